//! Shift Forward Library
//!
//! A two-ended TCP relay that shifts every byte it forwards. A client leg adds
//! one to each byte (or complements it in bitwise mode) on the way out, and a
//! server leg on the far side of the link undoes it, so the relayed protocol
//! no longer matches its usual wire signatures. This is obfuscation, not
//! encryption.

pub mod config;
pub mod connection;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use connection::ConnectionManager;
pub use relay::RelayEngine;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
