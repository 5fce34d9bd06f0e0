//! Shift Forward - obfuscating TCP relay
//!
//! Runs either as a standalone relay configured by flags, or as a
//! Shadowsocks (SIP003) plugin configured through `SS_*` environment variables.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shift_forward::{
    config::{CliOverrides, ConfigManager},
    Config, ConnectionManager, ShutdownCoordinator,
};

/// CLI arguments for Shift Forward
#[derive(Parser, Debug)]
#[command(name = "shift-forward")]
#[command(about = "Shift Forward - TCP relay that obfuscates traffic with a per-byte shift")]
#[command(version)]
#[command(long_about = "
Shift Forward - TCP relay that obfuscates traffic with a per-byte shift

Run one instance as a client next to the application and one as a server
next to the real service. Both ends must agree on --bitwise.

When SS_LOCAL_HOST is set the process runs as a Shadowsocks plugin and reads
its addresses from SS_LOCAL_HOST/SS_LOCAL_PORT/SS_REMOTE_HOST/SS_REMOTE_PORT.
SS_PLUGIN_OPTIONS is a ';'-separated list of: server, bitwise, verbose.

Configuration priority (highest to lowest):
1. Plugin environment variables
2. Command-line arguments
3. Configuration file (--config)
4. Built-in defaults

Source: https://github.com/HirbodBehnam/Shift-Forwarder
")]
pub struct CliArgs {
    /// Run as the server leg
    #[arg(long, help = "Pass this argument to run as server application")]
    pub server: bool,

    /// Complement bytes instead of shifting them
    #[arg(long, help = "Enable bitwise mode; otherwise addition mode is used")]
    pub bitwise: bool,

    /// Log accepts, dial failures and forwarding errors
    #[arg(short, long, help = "More logs")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        help = "If this is server, the port that proxy listens on; if this is client, the port that accepts the data"
    )]
    pub port: Option<u16>,

    #[arg(
        short,
        long,
        help = "Binding address. Server's default is :: (all interfaces) and client's is localhost"
    )]
    pub interface: Option<String>,

    #[arg(
        short,
        long,
        help = "If this is server, the address that the data will be forwarded; if this is client, the server address"
    )]
    pub to: Option<String>,

    /// Configuration file path
    #[arg(short, long, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level when not verbose")]
    pub log_level: Option<String>,

    #[arg(long, help = "Read buffer size in bytes per direction")]
    pub buffer_size: Option<usize>,

    #[arg(
        long,
        value_parser = humantime::parse_duration,
        help = "Outbound dial timeout (e.g. 10s)"
    )]
    pub connect_timeout: Option<Duration>,
}

impl CliArgs {
    fn to_overrides(&self) -> CliOverrides {
        CliOverrides {
            config: self.config.clone(),
            server: self.server,
            bitwise: self.bitwise,
            verbose: self.verbose,
            port: self.port,
            interface: self.interface.clone(),
            to: self.to.clone(),
            buffer_size: self.buffer_size,
            connect_timeout: self.connect_timeout,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = ConfigManager::resolve(&args.to_overrides())?;

    init_tracing(&config)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from: {}", path.display());
    }

    if config.logging.verbose {
        info!("Verbose mode on");
        info!("Server mode: {}", config.is_server());
        info!("Transform mode: {:?}", config.relay.mode);
        info!("Listening on {}", config.server.listen_addr);
        info!("Forwarding to {}", config.server.forward_to);
    }

    let manager = ConnectionManager::bind(Arc::new(config)).await?;

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let shutdown_rx = coordinator.subscribe();

    let signal_handle = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            if let Err(e) = coordinator.listen_for_signals().await {
                error!("Error setting up signal handlers: {}", e);
            }
        })
    };

    manager.run(shutdown_rx).await?;
    signal_handle.abort();

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &Config) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.effective_log_level()));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
