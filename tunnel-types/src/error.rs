//! Error types for the agent control protocol.

use thiserror::Error;

/// Errors that can occur while encoding or decoding control messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Transaction id outside the known request kinds
    #[error("unknown transaction id: {0}")]
    UnknownTransaction(u32),

    /// Message carried no transaction id
    #[error("message has no transaction id")]
    MissingTransaction,

    /// Payload did not match the expected shape
    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload {
        /// Request kind the payload belongs to.
        kind: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}
