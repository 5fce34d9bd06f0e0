//! Configuration Module
//!
//! Resolves the process configuration from plugin environment, command line and file.

pub mod manager;
pub mod types;

pub use manager::{join_host_port, split_host_port, CliOverrides, ConfigManager, PLUGIN_ENV_MARKER};
pub use types::*;
