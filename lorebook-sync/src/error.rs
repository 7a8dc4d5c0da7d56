//! Error types for the sync layer.

use lorebook_storage::StorageError;
use lorebook_types::Version;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote could not be reached or the transfer broke off.
    #[error("network error: {0}")]
    Network(String),

    /// The remote answered with an error status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A remote write carried an older version than the remote index holds.
    #[error("stale version for {key}: stored {stored}, attempted {attempted}")]
    StaleVersion {
        key: String,
        stored: Version,
        attempted: Version,
    },

    /// An item listed in an index has no content behind it.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not allowed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Local file system error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        match (e.status(), e.url()) {
            (Some(status), Some(url)) => SyncError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            },
            _ => SyncError::Network(e.to_string()),
        }
    }
}
