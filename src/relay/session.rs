//! Relay Session

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// One of the two copy directions of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inbound connection to outbound connection
    Upstream,
    /// Outbound connection back to inbound connection
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("inbound->outbound"),
            Direction::Downstream => f.write_str("outbound->inbound"),
        }
    }
}

/// An accepted inbound connection paired with its dialed outbound connection
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub target_addr: SocketAddr,
    pub duration: Duration,
    pub bytes_up: u64,
    pub bytes_down: u64,
    /// Direction whose copy loop finished first
    pub closed_by: Direction,
    /// Error that ended the session, if it was not a clean EOF
    pub error: Option<String>,
}

impl SessionStats {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }
}

impl RelaySession {
    /// Create a new relay session
    pub fn new(client_addr: SocketAddr, target_addr: SocketAddr) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let session_id = format!("relay_{}_{}", timestamp, client_addr.port());

        debug!("Creating relay session {} ({} -> {})", session_id, client_addr, target_addr);

        Self {
            session_id,
            client_addr,
            target_addr,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Bytes forwarded inbound -> outbound
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes forwarded outbound -> inbound
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Count bytes written in the given direction
    pub fn add_bytes(&self, direction: Direction, bytes: u64) {
        let counter = match direction {
            Direction::Upstream => &self.bytes_up,
            Direction::Downstream => &self.bytes_down,
        };
        counter.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Snapshot the session once it has ended
    pub fn to_stats(&self, closed_by: Direction, error: Option<String>) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            client_addr: self.client_addr,
            target_addr: self.target_addr,
            duration: self.duration(),
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            closed_by,
            error,
        }
    }

    /// Log session summary
    pub fn log_stats(&self, closed_by: Direction) {
        info!(
            session_id = %self.session_id,
            client_addr = %self.client_addr,
            target_addr = %self.target_addr,
            duration_ms = self.duration().as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            closed_by = %closed_by,
            "Relay session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_counters() {
        let session = RelaySession::new(
            "127.0.0.1:12345".parse().unwrap(),
            "127.0.0.1:54321".parse().unwrap(),
        );
        assert_eq!(session.total_bytes(), 0);

        session.add_bytes(Direction::Upstream, 1024);
        session.add_bytes(Direction::Downstream, 2048);
        session.add_bytes(Direction::Upstream, 1);

        assert_eq!(session.bytes_up(), 1025);
        assert_eq!(session.bytes_down(), 2048);
        assert_eq!(session.total_bytes(), 3073);

        let stats = session.to_stats(Direction::Downstream, None);
        assert_eq!(stats.bytes_up, 1025);
        assert_eq!(stats.bytes_down, 2048);
        assert_eq!(stats.closed_by, Direction::Downstream);
        assert!(stats.session_id.ends_with("_12345"));
    }
}
