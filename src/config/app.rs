//! Application (site tree and cache) configuration.

use std::path::PathBuf;

use super::parse::{env_or, env_parse};
use super::ConfigError;
use crate::cache::DEFAULT_CAPACITY;

/// Application configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Site root holding `cnf/`, `pub/`, `dat/` and `tpl/` (APP_ROOT).
    pub root: PathBuf,
    /// Host whose site configuration wires the container (APP_HOST).
    pub primary_host: String,
    /// Cache key namespace (CACHE_NAMESPACE).
    pub cache_namespace: String,
    /// Cache key revision (CACHE_REVISION); a new value orphans old entries.
    pub cache_revision: String,
    /// Maximum in-memory cache entries (CACHE_CAPACITY).
    pub cache_capacity: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = PathBuf::from(env_or("APP_ROOT", "."));
        if !root.is_dir() {
            return Err(ConfigError::Invalid {
                key: "APP_ROOT".into(),
                message: format!("'{}' is not a directory", root.display()),
            });
        }

        let cache_capacity = env_parse("CACHE_CAPACITY", DEFAULT_CAPACITY)?;
        if cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "CACHE_CAPACITY".into(),
                message: "must be positive".into(),
            });
        }

        Ok(Self {
            root,
            primary_host: env_or("APP_HOST", "localhost"),
            cache_namespace: env_or("CACHE_NAMESPACE", "tokio_mvc"),
            cache_revision: env_or("CACHE_REVISION", crate::PKG_VERSION),
            cache_capacity,
        })
    }

    /// Configuration rooted at `root` with defaults for everything else.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            primary_host: "localhost".into(),
            cache_namespace: "tokio_mvc".into(),
            cache_revision: crate::PKG_VERSION.into(),
            cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_root_defaults() {
        let config = AppConfig::with_root("/srv/site");
        assert_eq!(config.root, PathBuf::from("/srv/site"));
        assert_eq!(config.primary_host, "localhost");
        assert_eq!(config.cache_revision, crate::PKG_VERSION);
        assert_eq!(config.cache_capacity, DEFAULT_CAPACITY);
    }
}
