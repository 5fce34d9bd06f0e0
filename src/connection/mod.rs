//! Connection Management Module
//!
//! Accept loop and per-connection dispatch to the relay.

pub mod manager;

pub use manager::{connect_to_target, ConnectionManager};
