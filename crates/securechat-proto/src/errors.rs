//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing or parsing wire messages.
///
/// All variants are fatal for the connection they occur on: a peer that sends
/// a malformed frame or message cannot be resynchronized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer payload bytes were available than the length prefix claimed.
    #[error("frame truncated: expected {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Length announced by the prefix
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Payload exceeds [`crate::Frame::MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Announced or actual payload size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Payload is not a well-formed JSON message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// JSON object carried a `type` this protocol does not define.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
