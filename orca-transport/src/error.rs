//! Transport error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Reasons a fragment is refused by the reassembler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassembleError {
    #[error("fragment declares zero total packets (session {session_id})")]
    ZeroTotal { session_id: u32 },

    #[error("fragment index {index} out of range for {total} packets (session {session_id})")]
    IndexOutOfRange {
        session_id: u32,
        index: u16,
        total: u16,
    },

    #[error("session {session_id} expects {expected} packets, fragment declares {actual}")]
    TotalMismatch {
        session_id: u32,
        expected: u16,
        actual: u16,
    },
}

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] orca_protocol::ProtocolError),

    #[error("reassembly error: {0}")]
    Reassemble(#[from] ReassembleError),

    #[error("request id {0} is already pending")]
    DuplicateRequestId(u64),

    #[error("service is not running")]
    NotRunning,

    #[error("request timeout")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot resolve address: {0}")]
    AddressResolution(String),
}

impl ServiceError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Io(_) | ServiceError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ServiceError::Timeout.is_retryable());
        assert!(ServiceError::Io(std::io::Error::other("boom")).is_retryable());
        assert!(!ServiceError::DuplicateRequestId(1).is_retryable());
        assert!(!ServiceError::NotRunning.is_retryable());
        assert!(!ServiceError::Cancelled.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ReassembleError::IndexOutOfRange {
            session_id: 7,
            index: 5,
            total: 5,
        };
        assert_eq!(
            err.to_string(),
            "fragment index 5 out of range for 5 packets (session 7)"
        );

        let err: ServiceError = ConfigError::ValidationError("bad".to_string()).into();
        assert_eq!(
            err.to_string(),
            "configuration error: configuration validation failed: bad"
        );
    }
}
