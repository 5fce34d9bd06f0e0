//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::relay::{Role, TransformMode, DEFAULT_BUFFER_SIZE};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

/// Listener and dial target
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// host:port to bind
    pub listen_addr: String,
    /// host:port dialed for every accepted connection
    pub forward_to: String,
    /// Bound on each outbound dial; the OS default applies when unset
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
}

/// Transform selection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub role: Role,
    pub mode: TransformMode,
    pub buffer_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            mode: TransformMode::Addition,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_level: "error".to_string(),
        }
    }
}

impl Config {
    pub fn is_server(&self) -> bool {
        self.relay.role == Role::Server
    }

    /// Filter directive used when RUST_LOG is not set
    pub fn effective_log_level(&self) -> &str {
        if self.logging.verbose {
            "debug"
        } else {
            &self.logging.log_level
        }
    }
}
