//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding, decoding or fragmenting wire messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message too short: need at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("invalid message type: expected {expected}, got {actual}")]
    InvalidType { expected: u16, actual: u16 },

    #[error("unknown message type: {0}")]
    UnknownType(u16),

    #[error("buffer underrun: need {needed} bytes, {remaining} remaining")]
    BufferUnderrun { needed: usize, remaining: usize },

    #[error("field '{field}' too large: {size} (max {max})")]
    FieldTooLarge {
        field: &'static str,
        size: usize,
        max: usize,
    },

    #[error("invalid fragment: {0}")]
    InvalidFragment(String),

    #[error("message too large to fragment: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("invalid fragment payload budget: {0}")]
    InvalidPayloadBudget(usize),
}

impl ProtocolError {
    /// Returns whether the error was caused by malformed input from the peer,
    /// as opposed to a local encoding problem.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            ProtocolError::TooShort { .. }
                | ProtocolError::InvalidType { .. }
                | ProtocolError::UnknownType(_)
                | ProtocolError::BufferUnderrun { .. }
                | ProtocolError::InvalidFragment(_)
        )
    }
}
