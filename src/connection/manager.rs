//! Connection Manager Implementation

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, ServerConfig};
use crate::relay::{RelayEngine, RelaySession};
use crate::Result;

/// Accepts inbound connections and pairs each one with a dialed outbound connection
pub struct ConnectionManager {
    listener: TcpListener,
    config: Arc<Config>,
    engine: Arc<RelayEngine>,
}

impl ConnectionManager {
    /// Bind the listen address. Failure here is fatal for the process.
    pub async fn bind(config: Arc<Config>) -> Result<Self> {
        let listen_addr = config.server.listen_addr.as_str();

        debug!("Binding TCP listener to {}", listen_addr);
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to listen on {}", listen_addr))?;

        info!("Listening on {}", listener.local_addr()?);

        let engine = Arc::new(RelayEngine::from_config(&config));

        Ok(Self {
            listener,
            config,
            engine,
        })
    }

    /// Bind and serve until shutdown
    pub async fn start(config: Arc<Config>, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        Self::bind(config).await?.run(shutdown_rx).await
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Main connection acceptance loop.
    ///
    /// Runs until anything arrives on `shutdown_rx`, including the sender
    /// being dropped. Sessions already running are not waited for.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("Forwarding to {}", self.config.server.forward_to);

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            info!("Accepting new connection from {}", addr);

                            let config = Arc::clone(&self.config);
                            let engine = Arc::clone(&self.engine);
                            tokio::spawn(async move {
                                Self::handle_connection(stream, addr, config, engine).await;
                            });
                        }
                        Err(e) => {
                            warn!("Error on accepting new connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Dial the target and relay until either side closes.
    ///
    /// A failed dial drops the inbound stream, which closes it.
    #[instrument(skip(inbound, config, engine), fields(peer = %addr))]
    async fn handle_connection(
        inbound: TcpStream,
        addr: SocketAddr,
        config: Arc<Config>,
        engine: Arc<RelayEngine>,
    ) {
        let (outbound, target_addr) = match connect_to_target(&config.server).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Error on dialing: {:#}", e);
                return;
            }
        };

        set_nodelay(&inbound, "inbound");
        set_nodelay(&outbound, "outbound");

        let session = RelaySession::new(addr, target_addr);
        let stats = engine.relay(&session, inbound, outbound).await;

        debug!(
            "Closing a connection from {} ({} bytes up, {} bytes down)",
            addr, stats.bytes_up, stats.bytes_down
        );
    }
}

/// Resolve the forward-to address and connect to the first address that accepts.
///
/// No retries beyond trying each resolved address once.
pub async fn connect_to_target(server: &ServerConfig) -> Result<(TcpStream, SocketAddr)> {
    let target = server.forward_to.as_str();

    let addrs: Vec<SocketAddr> = lookup_host(target)
        .await
        .with_context(|| format!("Failed to resolve {}", target))?
        .collect();
    if addrs.is_empty() {
        return Err(anyhow!("No addresses resolved for {}", target));
    }

    let mut last_error = None;
    for addr in addrs {
        match try_connect(addr, server).await {
            Ok(stream) => {
                debug!("Connected to target {}", addr);
                return Ok((stream, addr));
            }
            Err(e) => {
                debug!("Failed to connect to {}: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(anyhow!(e).context(format!("Failed to connect to {}", target))),
        None => Err(anyhow!("Failed to connect to {}", target)),
    }
}

async fn try_connect(addr: SocketAddr, server: &ServerConfig) -> io::Result<TcpStream> {
    match server.connect_timeout {
        Some(limit) => match timeout(limit, TcpStream::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connection timed out")),
        },
        None => TcpStream::connect(addr).await,
    }
}

fn set_nodelay(stream: &TcpStream, side: &str) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on {} stream: {}", side, e);
    }
}
