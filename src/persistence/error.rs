//! Error types for persistence operations.

use thiserror::Error;

/// Errors that can occur during snapshot save/load.
///
/// All of these are recoverable from the index's perspective: a failed
/// save can be retried (the dirty flag stays raised), and a failed load
/// leaves the in-memory index untouched.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error (file operations, disk I/O)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Format error (bad magic bytes, version mismatch, truncation)
    #[error("format error: {0}")]
    Format(String),

    /// Snapshot encoding failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Snapshot decoding failed
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// No snapshot stored under the requested key
    #[error("snapshot not found: {0}")]
    NotFound(String),

    /// Operation requires a backend that is not configured
    #[error("operation not supported: {0}")]
    NotSupported(String),
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;
