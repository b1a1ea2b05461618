//! Error types for finstream-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid push interval: {0}ms (must be between 500ms and 60000ms)")]
    InvalidInterval(u64),

    #[error("Unknown stream kind: {0}")]
    UnknownStreamKind(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
