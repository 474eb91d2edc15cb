//! The remote data API the engine replays mutations against.

use crate::error::SyncResult;
use async_trait::async_trait;
use meetcache_store::Table;
use serde_json::Value;

/// Per-table remote operations. Authentication and endpoint shape belong to
/// the implementation.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates a record and returns the server representation.
    async fn insert(&self, table: Table, payload: &Value) -> SyncResult<Value>;

    /// Creates or merges a record by primary key and returns the server
    /// representation.
    async fn upsert_by_key(&self, table: Table, payload: &Value) -> SyncResult<Value>;

    /// Returns the server record with key `id` if its version is strictly
    /// greater than `lower_version`.
    async fn fetch_by_key_and_version(
        &self,
        table: Table,
        id: &str,
        lower_version: i64,
    ) -> SyncResult<Option<Value>>;

    /// Applies a partial update to the record with key `id`.
    async fn patch(&self, table: Table, id: &str, payload: &Value) -> SyncResult<()>;

    async fn delete(&self, table: Table, id: &str) -> SyncResult<()>;
}

/// Numeric `version` of a record; records without one are version 0.
pub fn record_version(record: &Value) -> i64 {
    record.get("version").and_then(Value::as_i64).unwrap_or(0)
}
