//! Configuration Manager

use super::Config;
use crate::relay::{Role, TransformMode};
use crate::Result;
use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Set by a SIP003 host (e.g. Shadowsocks) when it launches us as a plugin
pub const PLUGIN_ENV_MARKER: &str = "SS_LOCAL_HOST";

/// Values taken from the command line; unset fields leave the config untouched
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub server: bool,
    pub bitwise: bool,
    pub verbose: bool,
    pub port: Option<u16>,
    pub interface: Option<String>,
    pub to: Option<String>,
    pub buffer_size: Option<usize>,
    pub connect_timeout: Option<Duration>,
    pub log_level: Option<String>,
}

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Resolve the final configuration from the process environment and CLI
    pub fn resolve(cli: &CliOverrides) -> Result<Config> {
        Self::resolve_with(cli, |key| std::env::var(key).ok())
    }

    /// Resolve configuration with a custom environment lookup.
    ///
    /// Plugin environment wins over the command line for everything it
    /// covers; `--config` and `--log-level` still apply in plugin mode.
    pub fn resolve_with<F>(cli: &CliOverrides, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &cli.config {
            Some(path) => Self::load_from_file(path)?,
            None => Config::default(),
        };

        if !Self::apply_plugin_env(&mut config, &lookup) {
            config.merge_with_cli_args(cli);
        }

        if let Some(level) = &cli.log_level {
            config.logging.log_level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Fill the config from SIP003 plugin variables.
    ///
    /// Returns false, leaving the config untouched, when the process was
    /// not started as a plugin.
    pub fn apply_plugin_env<F>(config: &mut Config, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        let local_host = match lookup(PLUGIN_ENV_MARKER) {
            Some(host) if !host.is_empty() => host,
            _ => return false,
        };
        let var = |key: &str| lookup(key).unwrap_or_default();

        let options = var("SS_PLUGIN_OPTIONS");
        let has_option = |name: &str| options.split(';').any(|opt| opt.trim() == name);

        config.relay.role = if has_option("server") {
            Role::Server
        } else {
            Role::Client
        };
        config.relay.mode = if has_option("bitwise") {
            TransformMode::Bitwise
        } else {
            TransformMode::Addition
        };
        config.logging.verbose = has_option("verbose");

        let local = join_host_port(&local_host, &var("SS_LOCAL_PORT"));
        let remote = join_host_port(&var("SS_REMOTE_HOST"), &var("SS_REMOTE_PORT"));

        // The server leg listens where the host expects the remote end and
        // forwards to the local service; the client leg is the reverse.
        let (listen_addr, forward_to) = match config.relay.role {
            Role::Server => (remote, local),
            Role::Client => (local, remote),
        };
        config.server.listen_addr = listen_addr;
        config.server.forward_to = forward_to;

        true
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() || self.server.forward_to.is_empty() {
            bail!("Please enter `port` and `to` values as argument. Pass --help to see help");
        }

        for (name, addr) in [
            ("listen_addr", &self.server.listen_addr),
            ("forward_to", &self.server.forward_to),
        ] {
            let (_, port) = split_host_port(addr)
                .with_context(|| format!("{} must be in host:port form, got '{}'", name, addr))?;
            port.parse::<u16>()
                .with_context(|| format!("{} has an invalid port: '{}'", name, addr))?;
        }

        if let Some(timeout) = self.server.connect_timeout {
            if timeout.is_zero() {
                bail!("connect_timeout must be greater than 0");
            }
        }

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.relay.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.log_level.as_str()) {
            bail!("log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(&mut self, cli: &CliOverrides) {
        if cli.server {
            self.relay.role = Role::Server;
        }

        if cli.bitwise {
            self.relay.mode = TransformMode::Bitwise;
        }

        if cli.verbose {
            self.logging.verbose = true;
        }

        if cli.port.is_some() || cli.interface.is_some() {
            let existing = split_host_port(&self.server.listen_addr);

            let host = cli
                .interface
                .clone()
                .filter(|host| !host.is_empty())
                .or_else(|| existing.as_ref().map(|(host, _)| host.to_string()))
                .filter(|host| !host.is_empty())
                .unwrap_or_else(|| self.default_interface().to_string());
            let port = cli
                .port
                .map(|port| port.to_string())
                .or_else(|| existing.map(|(_, port)| port.to_string()))
                .unwrap_or_default();

            // An interface alone leaves the address unset and fails validation.
            if !port.is_empty() {
                self.server.listen_addr = join_host_port(&host, &port);
            }
        }

        if let Some(to) = &cli.to {
            self.server.forward_to = to.clone();
        }

        if let Some(buffer_size) = cli.buffer_size {
            self.relay.buffer_size = buffer_size;
        }

        if let Some(timeout) = cli.connect_timeout {
            self.server.connect_timeout = Some(timeout);
        }
    }

    /// Servers listen on every interface (IPv6 and IPv4), clients only on loopback
    pub fn default_interface(&self) -> &'static str {
        match self.relay.role {
            Role::Server => "::",
            Role::Client => "localhost",
        }
    }
}

/// Join host and port, bracketing IPv6 literals
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    let (host, port) = addr.rsplit_once(':')?;
    if port.is_empty() {
        return None;
    }
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.contains(':') && !addr.starts_with('[') {
        return None;
    }
    Some((host, port))
}
