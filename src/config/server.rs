//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::parse::{env_opt, env_or, env_parse};
use super::ConfigError;

/// Default request body limit (10 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// TLS configuration.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Path to TLS certificate (PEM format).
    pub cert_path: Option<PathBuf>,
    /// Path to TLS private key (PEM format).
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Check if TLS is configured.
    pub fn is_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }

    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            cert_path: env_opt("TLS_CERT").map(PathBuf::from),
            key_path: env_opt("TLS_KEY").map(PathBuf::from),
        }
    }
}

/// Server configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080).
    pub listen_addr: SocketAddr,
    /// Runtime worker threads (0 = number of CPUs).
    pub workers: usize,
    /// Graceful shutdown drain timeout.
    pub drain_timeout: Duration,
    /// Header read timeout (slowloris protection).
    pub header_timeout: Duration,
    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
    /// TLS configuration.
    pub tls: TlsConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr: SocketAddr = env_or("LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .map_err(|e| ConfigError::Parse {
                key: "LISTEN_ADDR".into(),
                value: env_or("LISTEN_ADDR", "0.0.0.0:8080"),
                error: format!("{}", e),
            })?;

        let tls = TlsConfig::from_env();
        if tls.cert_path.is_some() != tls.key_path.is_some() {
            return Err(ConfigError::Invalid {
                key: "TLS_CERT".into(),
                message: "TLS_CERT and TLS_KEY must be set together".into(),
            });
        }

        Ok(Self {
            listen_addr,
            workers: env_parse("WORKERS", 0usize)?,
            drain_timeout: Duration::from_secs(env_parse("DRAIN_TIMEOUT_SECS", 30u64)?),
            header_timeout: Duration::from_secs(env_parse("HEADER_TIMEOUT_SECS", 5u64)?),
            max_body_size: env_parse("MAX_BODY_SIZE", DEFAULT_MAX_BODY_SIZE)?,
            tls,
        })
    }

    /// Resolved worker thread count.
    pub fn worker_threads(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            workers: 0,
            drain_timeout: Duration::from_secs(30),
            header_timeout: Duration::from_secs(5),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            tls: TlsConfig::default(),
        }
    }
}
