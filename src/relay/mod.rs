//! Data Relay Module
//!
//! Bidirectional transform-copy between the inbound and outbound legs of a session.

pub mod engine;
pub mod session;
pub mod transform;

pub use engine::{is_teardown_error, transform_copy, RelayEngine, DEFAULT_BUFFER_SIZE};
pub use session::{Direction, RelaySession, SessionStats};
pub use transform::{Role, Transform, TransformMode, TransformPair};
