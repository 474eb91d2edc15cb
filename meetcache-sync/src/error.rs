//! Sync error types.

use crate::types::{Operation, QueueStatus};
use meetcache_store::{StorageError, Table};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing the local cache.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote rejected request ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("authentication required")]
    AuthRequired,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(Operation),

    #[error("table '{0}' is local-only and cannot be synced")]
    LocalOnlyTable(Table),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid queue transition: {from} -> {to}")]
    InvalidTransition { from: QueueStatus, to: QueueStatus },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("sync scheduler is not running")]
    SchedulerStopped,
}

impl SyncError {
    /// True for failures a later attempt may get past: network errors and
    /// remote rejections. Errors about the item itself are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Http(_)
                | SyncError::Remote { .. }
                | SyncError::AuthRequired
        )
    }
}
