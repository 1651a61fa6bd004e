//! Structured error types.
//!
//! Construction and the rewrite passes are total: the only fallible
//! operations are deserialisation and oracle-clause callbacks.

use std::fmt;

/// Errors reported while decoding the binary format.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GraphError {
    #[error("malformed magic byte at position {position}: expected 'T', found {found:#04x}")]
    BadMagic { position: usize, found: u8 },

    #[error("truncated stream: expected {needed} more byte(s) at position {position}")]
    Truncated { position: usize, needed: usize },

    #[error("opcode byte {opcode:#04x} out of range at position {position}")]
    UnknownOpcode { position: usize, opcode: u8 },

    #[error("node index {index} out of bounds ({emitted} node(s) emitted so far) at position {position}")]
    IndexOutOfBounds { position: usize, index: u32, emitted: usize },

    #[error("stream ended before the two-byte terminator at position {position}")]
    MissingTerminator { position: usize },

    #[error("invalid UTF-8 metadata string at position {position}")]
    InvalidMetadataString { position: usize },

    #[error("unregistered oracle tag {tag:?} at position {position}")]
    UnknownOracleTag { position: usize, tag: String },

    #[error("oracle clause callback failed: {0}")]
    Oracle(#[from] OracleError),
}

impl PartialEq for GraphError {
    fn eq(&self, other: &Self) -> bool {
        format!("{self:?}") == format!("{other:?}")
    }
}
impl Eq for GraphError {}

/// Errors bubbled up unchanged from an oracle clause's own serialise/deserialise
/// callback.
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[error("{message}")]
pub struct OracleError {
    pub message: String,
}

impl OracleError {
    pub fn new(message: impl fmt::Display) -> Self {
        OracleError { message: message.to_string() }
    }
}
