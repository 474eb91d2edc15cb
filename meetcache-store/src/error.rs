//! Error types for the local store.

use thiserror::Error;

/// All errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record in table '{table}' has no primary key '{key_path}'")]
    MissingKey {
        table: &'static str,
        key_path: &'static str,
    },

    #[error("table '{table}' has no index named '{index}'")]
    UnknownIndex { table: &'static str, index: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
