//! Secondary index values and the forward-only range cursor.

use crate::error::StorageResult;
use crate::local_store::LocalStore;
use crate::table::{IndexSpec, Table};
use serde_json::Value;
use std::ops::Bound;

/// A value stored in a secondary index.
///
/// Integers order before strings; strings order bytewise, so ISO-8601
/// timestamps order chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexValue {
    Integer(i64),
    Text(String),
}

impl IndexValue {
    /// Reads the indexed field of a record. Records whose field is missing or
    /// not an integer/string are absent from the index.
    pub fn extract(spec: &IndexSpec, record: &Value) -> Option<Self> {
        match record.get(spec.field)? {
            Value::String(s) => Some(IndexValue::Text(s.clone())),
            Value::Number(n) => n.as_i64().map(IndexValue::Integer),
            _ => None,
        }
    }

    /// Order-preserving string encoding used by the DuckDB backend.
    ///
    /// For any two values, `a.cmp(&b) == a.sort_key().cmp(&b.sort_key())`.
    pub fn sort_key(&self) -> String {
        match self {
            IndexValue::Integer(i) => format!("0{:020}", (*i as u64) ^ (1 << 63)),
            IndexValue::Text(s) => format!("1{s}"),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        IndexValue::Text(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        IndexValue::Text(s)
    }
}

impl From<i64> for IndexValue {
    fn from(i: i64) -> Self {
        IndexValue::Integer(i)
    }
}

/// Position of an entry in an index: ordered by value, then primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexPosition {
    pub value: IndexValue,
    pub key: String,
}

/// Returns true when `value` satisfies the upper bound.
pub fn within_upper(value: &IndexValue, upper: Bound<&IndexValue>) -> bool {
    match upper {
        Bound::Included(b) => value <= b,
        Bound::Excluded(b) => value < b,
        Bound::Unbounded => true,
    }
}

/// Lazy, finite, forward-only cursor over an index, in index order.
///
/// Each step seeks strictly past the last visited `(value, key)` position, so
/// deleting the current record and advancing is always safe. Once the cursor
/// returns `None` it stays exhausted; it cannot be rewound.
pub struct IndexCursor<'a> {
    store: &'a dyn LocalStore,
    table: Table,
    index: String,
    upper: Bound<IndexValue>,
    position: Option<IndexPosition>,
    current: Option<String>,
    exhausted: bool,
}

impl<'a> IndexCursor<'a> {
    pub fn new(
        store: &'a dyn LocalStore,
        table: Table,
        index: &str,
        upper: Bound<IndexValue>,
    ) -> Self {
        Self {
            store,
            table,
            index: index.to_string(),
            upper,
            position: None,
            current: None,
            exhausted: false,
        }
    }

    /// Starts the cursor at the first entry whose value is at least `lower`.
    ///
    /// Primary keys are never empty, so `(lower, "")` sorts just before every
    /// entry equal to `lower`.
    pub fn starting_at(mut self, lower: IndexValue) -> Self {
        self.position = Some(IndexPosition {
            value: lower,
            key: String::new(),
        });
        self
    }

    /// Advances to the next record, or `None` when the range is exhausted.
    pub async fn next(&mut self) -> StorageResult<Option<Value>> {
        if self.exhausted {
            return Ok(None);
        }
        let found = self
            .store
            .seek_index(
                self.table,
                &self.index,
                self.position.as_ref(),
                self.upper.as_ref(),
            )
            .await?;
        match found {
            Some((position, record)) => {
                self.current = Some(position.key.clone());
                self.position = Some(position);
                Ok(Some(record))
            }
            None => {
                self.exhausted = true;
                self.current = None;
                Ok(None)
            }
        }
    }

    /// Primary key of the record last returned by `next`.
    pub fn current_key(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Deletes the record last returned by `next`. A no-op when there is none
    /// or it was already deleted.
    pub async fn delete_current(&mut self) -> StorageResult<()> {
        if let Some(key) = self.current.take() {
            self.store.delete(self.table, &key).await?;
        }
        Ok(())
    }
}
