//! Process-local store backed by ordered maps.

use crate::error::{StorageError, StorageResult};
use crate::index::{within_upper, IndexPosition, IndexValue};
use crate::local_store::LocalStore;
use crate::table::Table;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    records: HashMap<Table, BTreeMap<String, Value>>,
    /// Ordered entries per `(table, index name)`, kept in step with `records`.
    indexes: HashMap<(Table, &'static str), BTreeSet<IndexPosition>>,
    sequences: HashMap<Table, u64>,
}

impl Tables {
    fn unindex(&mut self, table: Table, key: &str, record: &Value) {
        for spec in table.schema().indexes {
            if let Some(value) = IndexValue::extract(spec, record) {
                if let Some(entries) = self.indexes.get_mut(&(table, spec.name)) {
                    entries.remove(&IndexPosition {
                        value,
                        key: key.to_string(),
                    });
                }
            }
        }
    }

    fn index(&mut self, table: Table, key: &str, record: &Value) {
        for spec in table.schema().indexes {
            if let Some(value) = IndexValue::extract(spec, record) {
                self.indexes
                    .entry((table, spec.name))
                    .or_default()
                    .insert(IndexPosition {
                        value,
                        key: key.to_string(),
                    });
            }
        }
    }
}

/// In-memory `LocalStore`. Cheap to clone; clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("memory store recovering from poisoned mutex");
            poisoned.into_inner()
        })
    }
}

/// Resolves the primary key of `record`, assigning the next sequence value on
/// auto-increment tables.
pub(crate) fn assign_key(
    table: Table,
    record: &mut Value,
    next_id: impl FnOnce() -> u64,
) -> StorageResult<String> {
    if !record.is_object() {
        return Err(StorageError::InvalidRecord(format!(
            "records in '{table}' must be JSON objects"
        )));
    }
    if let Some(key) = table.key_of(record) {
        return Ok(key);
    }
    let schema = table.schema();
    if !schema.auto_increment {
        return Err(StorageError::MissingKey {
            table: schema.name,
            key_path: schema.key_path,
        });
    }
    let id = next_id();
    record[schema.key_path] = Value::from(id);
    Ok(id.to_string())
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, table: Table, key: &str) -> StorageResult<Option<Value>> {
        let tables = self.lock();
        Ok(tables.records.get(&table).and_then(|t| t.get(key)).cloned())
    }

    async fn put(&self, table: Table, mut record: Value) -> StorageResult<String> {
        let mut tables = self.lock();
        let current = tables.sequences.get(&table).copied().unwrap_or(0);
        let key = assign_key(table, &mut record, || current + 1)?;
        // Explicit keys on auto-increment tables also push the sequence
        // forward, so assigned ids stay monotonic.
        if table.schema().auto_increment {
            if let Ok(id) = key.parse::<u64>() {
                if id > current {
                    tables.sequences.insert(table, id);
                }
            }
        }
        let previous = tables.records.get_mut(&table).and_then(|t| t.remove(&key));
        if let Some(old) = previous {
            tables.unindex(table, &key, &old);
        }
        tables.index(table, &key, &record);
        tables
            .records
            .entry(table)
            .or_default()
            .insert(key.clone(), record);
        Ok(key)
    }

    async fn get_all(&self, table: Table) -> StorageResult<Vec<Value>> {
        let tables = self.lock();
        Ok(tables
            .records
            .get(&table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, table: Table, key: &str) -> StorageResult<()> {
        let mut tables = self.lock();
        let removed = tables.records.get_mut(&table).and_then(|t| t.remove(key));
        if let Some(old) = removed {
            tables.unindex(table, key, &old);
        }
        Ok(())
    }

    async fn count(&self, table: Table) -> StorageResult<usize> {
        let tables = self.lock();
        Ok(tables.records.get(&table).map_or(0, BTreeMap::len))
    }

    async fn seek_index(
        &self,
        table: Table,
        index: &str,
        after: Option<&IndexPosition>,
        upper: Bound<&IndexValue>,
    ) -> StorageResult<Option<(IndexPosition, Value)>> {
        let spec = table.index(index)?;
        let tables = self.lock();
        let Some(entries) = tables.indexes.get(&(table, spec.name)) else {
            return Ok(None);
        };

        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let Some(position) = entries.range((lower, Bound::Unbounded)).next() else {
            return Ok(None);
        };
        if !within_upper(&position.value, upper) {
            return Ok(None);
        }
        let record = tables
            .records
            .get(&table)
            .and_then(|t| t.get(&position.key))
            .cloned()
            .ok_or_else(|| {
                StorageError::InvalidRecord(format!(
                    "index '{}' points at missing {table}/{}",
                    spec.name, position.key
                ))
            })?;
        Ok(Some((position.clone(), record)))
    }
}
