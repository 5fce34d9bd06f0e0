//! Shutdown Handling
//!
//! Turns SIGTERM/SIGINT into a broadcast that stops the accept loop. Sessions
//! that are still relaying are abandoned when the process exits.

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::Result;

/// Fans a single stop signal out to every subscriber
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal every subscriber to stop
    pub fn trigger(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }
    }

    /// Wait for SIGTERM or SIGINT (Ctrl+C on Windows), then trigger shutdown
    pub async fn listen_for_signals(&self) -> Result<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, shutting down");
        }

        self.trigger();
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new();
        let mut first = coordinator.subscribe();
        let mut second = coordinator.subscribe();

        coordinator.trigger();

        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_trigger_without_subscribers_does_not_panic() {
        let coordinator = ShutdownCoordinator::default();
        coordinator.trigger();
    }
}
