//! Byte Transforms
//!
//! Reversible per-byte obfuscation applied to every chunk the relay moves.
//! A client instance and a server instance configured with opposite roles
//! and the same mode undo each other's transform end-to-end.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which leg of the link this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Faces the originating client; encodes what it forwards
    #[default]
    Client,
    /// Faces the real service; decodes what it forwards
    Server,
}

/// Obfuscation scheme shared by both legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
    /// Add or subtract one, wrapping at 256
    #[default]
    Addition,
    /// Bitwise complement, its own inverse
    Bitwise,
}

/// A single per-byte transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Increment,
    Decrement,
    Complement,
}

impl Transform {
    /// Transform one byte
    #[inline]
    pub fn apply_byte(self, byte: u8) -> u8 {
        match self {
            Transform::Increment => byte.wrapping_add(1),
            Transform::Decrement => byte.wrapping_sub(1),
            Transform::Complement => !byte,
        }
    }

    /// Transform a buffer in place
    pub fn apply(self, buf: &mut [u8]) {
        match self {
            Transform::Increment => buf.iter_mut().for_each(|b| *b = b.wrapping_add(1)),
            Transform::Decrement => buf.iter_mut().for_each(|b| *b = b.wrapping_sub(1)),
            Transform::Complement => buf.iter_mut().for_each(|b| *b = !*b),
        }
    }

    /// The transform that undoes this one
    pub fn inverse(self) -> Self {
        match self {
            Transform::Increment => Transform::Decrement,
            Transform::Decrement => Transform::Increment,
            Transform::Complement => Transform::Complement,
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transform::Increment => "byte+1",
            Transform::Decrement => "byte-1",
            Transform::Complement => "!byte",
        };
        f.write_str(name)
    }
}

/// Transforms for both directions of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformPair {
    /// Applied to bytes read from the inbound side and written outbound
    pub upstream: Transform,
    /// Applied to bytes read from the outbound side and written inbound
    pub downstream: Transform,
}

impl TransformPair {
    /// Select the transforms for a role and mode
    pub fn new(role: Role, mode: TransformMode) -> Self {
        let upstream = match (mode, role) {
            (TransformMode::Bitwise, _) => Transform::Complement,
            (TransformMode::Addition, Role::Client) => Transform::Increment,
            (TransformMode::Addition, Role::Server) => Transform::Decrement,
        };

        Self {
            upstream,
            downstream: upstream.inverse(),
        }
    }
}
