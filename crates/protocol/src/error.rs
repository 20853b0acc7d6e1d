//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering every way an inbound record can be rejected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The record was not valid JSON.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The record was JSON but carried no `action` field.
    #[error("message has no action field")]
    MissingAction,

    /// The `action` field named something the daemon does not understand.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The action is known but its fields did not match.
    #[error("invalid {action} message: {reason}")]
    InvalidFields {
        /// The action whose payload failed to decode.
        action: String,
        /// Decoder explanation.
        reason: String,
    },

    /// A single line exceeded the configured maximum record size.
    #[error("line too long: {size} bytes exceeds maximum of {max} bytes")]
    LineTooLong {
        /// Bytes accumulated before the line was discarded.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Failed to serialize an outbound record.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
