//! Configuration module for tokio_mvc.
//!
//! Process-level settings come from environment variables. Per-site settings
//! (routes, mime types, CSRF rules, ...) live in TOML files under
//! `<APP_ROOT>/cnf` and are handled by [`crate::environment`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_mvc::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.server.listen_addr);
//! println!("Site root: {:?}", config.app.root);
//! ```

mod app;
mod error;
mod logging;
mod middleware;
pub mod parse;
mod server;

pub use app::AppConfig;
pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use middleware::MiddlewareConfig;
pub use server::{ServerConfig, TlsConfig, DEFAULT_MAX_BODY_SIZE};

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Site tree and cache configuration.
    pub app: AppConfig,
    /// Middleware configuration.
    pub middleware: MiddlewareConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            app: AppConfig::from_env()?,
            middleware: MiddlewareConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Listen: {}", self.server.listen_addr);
        info!("  Workers: {}", self.server.worker_threads());
        info!("  Site root: {:?}", self.app.root);
        info!("  Primary host: {}", self.app.primary_host);
        info!(
            "  Cache: {}:*:{} ({} entries)",
            self.app.cache_namespace, self.app.cache_revision, self.app.cache_capacity
        );

        if self.server.tls.is_enabled() {
            info!("  TLS: enabled");
        }

        if let Some(limit) = self.middleware.rate_limit {
            info!(
                "  Rate limit: {} req/{}s per IP",
                limit, self.middleware.rate_window
            );
        }

        if self.middleware.access_log {
            info!("  Access log: enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        std::env::remove_var("LISTEN_ADDR");
        std::env::remove_var("DRAIN_TIMEOUT_SECS");
        std::env::remove_var("MAX_BODY_SIZE");
        std::env::remove_var("TLS_CERT");
        std::env::remove_var("TLS_KEY");

        let server = ServerConfig::from_env().expect("Should load config");
        assert_eq!(server.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(server.drain_timeout.as_secs(), 30);
        assert_eq!(server.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert!(!server.tls.is_enabled());
    }

    #[test]
    fn test_app_config_rejects_missing_root() {
        std::env::set_var("APP_ROOT", "/definitely/not/here");
        assert!(matches!(
            AppConfig::from_env(),
            Err(ConfigError::Invalid { .. })
        ));
        std::env::remove_var("APP_ROOT");
    }
}
