//! Payload error types.

use thiserror::Error;

/// Errors raised while building, parsing, reading or forwarding payloads.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The sequence number was zero or negative.
    #[error("Sequence must be positive")]
    InvalidSequence,

    /// A message carried a body but no `x-seq` header.
    #[error("Missing sequence header")]
    MissingSequenceHeader,

    /// The `x-seq` header was not a decimal integer.
    #[error("Malformed sequence header '{0}'")]
    MalformedSequenceHeader(String),

    /// The byte source reached end of stream.
    #[error("Target server connection closed")]
    TargetClosed,

    /// Too many out-of-order payloads are waiting for a gap to fill.
    #[error("Too many messages queued")]
    QueueFull,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
