//! Error types for the sync engine.

use offlink_protocol::NormalizedError;
use thiserror::Error;

/// Result type for transport calls. Callers only ever see normalized errors.
pub type TransportResult<T> = Result<T, NormalizedError>;

/// Result type for offline queue persistence.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by a queue persistence backend.
#[derive(Error, Debug)]
pub enum QueueError {
    /// I/O error.
    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A queued entry could not be encoded or decoded.
    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
