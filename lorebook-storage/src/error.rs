//! Error types for the storage layer.

use lorebook_types::Version;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from DuckDB.
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested record does not exist (or is a tombstone).
    #[error("not found: {0}")]
    NotFound(String),

    /// The underlying storage cannot be accessed.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write carried a version older than the stored one.
    #[error("stale version for {key}: stored {stored}, attempted {attempted}")]
    StaleVersion {
        key: String,
        stored: Version,
        attempted: Version,
    },

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
