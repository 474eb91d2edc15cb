//! The `LocalStore` contract shared by every backend.

use crate::error::StorageResult;
use crate::index::{IndexCursor, IndexPosition, IndexValue};
use crate::table::{Table, TableRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::ops::Bound;

/// Generic keyed table store.
///
/// `put` is insert-or-overwrite by primary key. Concurrent writes to the same
/// key are not serialised: the last write to complete wins. Errors are
/// returned as-is; no operation is retried.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, table: Table, key: &str) -> StorageResult<Option<Value>>;

    /// Writes a record and returns its primary key.
    async fn put(&self, table: Table, record: Value) -> StorageResult<String>;

    async fn get_all(&self, table: Table) -> StorageResult<Vec<Value>>;

    /// Deletes a record. Deleting a missing key is not an error.
    async fn delete(&self, table: Table, key: &str) -> StorageResult<()>;

    async fn count(&self, table: Table) -> StorageResult<usize>;

    /// Returns the first index entry strictly after `after` (or the first
    /// entry when `after` is `None`) that satisfies `upper`.
    ///
    /// This is the primitive behind [`IndexCursor`]; callers normally use
    /// `range_by_index` instead.
    async fn seek_index(
        &self,
        table: Table,
        index: &str,
        after: Option<&IndexPosition>,
        upper: Bound<&IndexValue>,
    ) -> StorageResult<Option<(IndexPosition, Value)>>;
}

impl<'s> dyn LocalStore + 's {
    /// Opens a lazy cursor over `index`, in ascending order, up to `upper`.
    pub fn range_by_index(
        &self,
        table: Table,
        index: &str,
        upper: Bound<IndexValue>,
    ) -> IndexCursor<'_> {
        IndexCursor::new(self, table, index, upper)
    }

    /// Opens a lazy cursor over the entries of `index` equal to `value`.
    pub fn entries_equal_to(
        &self,
        table: Table,
        index: &str,
        value: IndexValue,
    ) -> IndexCursor<'_> {
        IndexCursor::new(self, table, index, Bound::Included(value.clone())).starting_at(value)
    }

    /// Reads a typed record from its table.
    pub async fn get_record<T: TableRecord>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(T::TABLE, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Writes a typed record to its table and returns the primary key.
    pub async fn put_record<T: TableRecord>(&self, record: &T) -> StorageResult<String> {
        let value = serde_json::to_value(record)?;
        self.put(T::TABLE, value).await
    }

    /// Reads every record of a typed table.
    pub async fn get_all_records<T: TableRecord>(&self) -> StorageResult<Vec<T>> {
        self.get_all(T::TABLE)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }
}
