//! Middleware configuration.

use super::parse::{env_bool, env_parse};
use super::ConfigError;

/// Middleware configuration loaded from environment.
#[derive(Clone, Debug, Default)]
pub struct MiddlewareConfig {
    /// Rate limit: max requests per IP per window (None = disabled).
    pub rate_limit: Option<u64>,
    /// Rate limit window in seconds.
    pub rate_window: u64,
    /// Access logging enabled.
    pub access_log: bool,
}

impl MiddlewareConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let rate_limit: u64 = env_parse("RATE_LIMIT", 0)?;
        let rate_window: u64 = env_parse("RATE_WINDOW", 60)?;
        if rate_limit > 0 && rate_window == 0 {
            return Err(ConfigError::Invalid {
                key: "RATE_WINDOW".into(),
                message: "must be positive when RATE_LIMIT is set".into(),
            });
        }

        Ok(Self {
            rate_limit: (rate_limit > 0).then_some(rate_limit),
            rate_window,
            access_log: env_bool("ACCESS_LOG", false),
        })
    }

    /// Check if rate limiting is enabled.
    pub fn is_rate_limiting_enabled(&self) -> bool {
        self.rate_limit.is_some()
    }
}
