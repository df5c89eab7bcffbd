//! Error types for tickwire.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unrecoverable framing.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Connect attempt did not finish within the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// Peer closed the channel or the channel failed.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// OS write error while transmitting a frame.
    #[error("write failed: {0}")]
    WriteFailed(std::io::Error),

    /// Peer stopped draining the channel for longer than the write timeout.
    #[error("write made no progress for {0:?}")]
    WriteTimeout(std::time::Duration),

    /// A chunked write is already in flight on this connection.
    #[error("already writing response for request {0}")]
    AlreadyWriting(crate::protocol::RequestId),

    /// No handler registered for the action.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Catalog lookup or load failure.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Request id does not fit in 8 decimal digits.
    #[error("request id {0} exceeds 8 decimal digits")]
    InvalidRequestId(u64),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Framing-level failures reported by the codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// A header field is not an 8-digit decimal number.
    #[error("malformed {field} field: {raw:?}")]
    BadHeader { field: &'static str, raw: String },

    /// Declared payload length is above the configured maximum.
    #[error("payload size {len} exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// The bytes after the payload are not `END_OF_MESSAGE`.
    #[error("missing END_OF_MESSAGE terminator")]
    MissingTerminator,

    /// A value does not fit in an 8-digit decimal field.
    #[error("{field} value {value} exceeds 8 decimal digits")]
    FieldOverflow { field: &'static str, value: usize },

    /// Payload is not valid UTF-8 text.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
