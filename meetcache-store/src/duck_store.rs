//! Persistent `LocalStore` backed by DuckDB.
//!
//! All tables share one `records` table keyed by `(tbl, key)`, with records
//! stored as JSON text. Secondary index entries live in `record_index_entries`
//! as order-preserving sort keys (see [`IndexValue::sort_key`]), rewritten on
//! every `put`. Each write runs in one transaction, so a record never exists
//! without its index entries.

use crate::error::StorageResult;
use crate::index::{IndexPosition, IndexValue};
use crate::local_store::LocalStore;
use crate::memory_store::assign_key;
use crate::table::Table;
use async_trait::async_trait;
use duckdb::{params, Connection};
use serde_json::Value;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Resource limits applied to every connection a store opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuckDbLimits {
    /// DuckDB size string, e.g. `"128MB"`.
    pub memory_limit: String,
    pub threads: u32,
}

impl Default for DuckDbLimits {
    fn default() -> Self {
        Self {
            memory_limit: "128MB".to_string(),
            threads: 1,
        }
    }
}

impl DuckDbLimits {
    fn apply(&self, conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(&format!(
            "SET memory_limit = '{}'; SET threads = {};",
            self.memory_limit, self.threads
        ))?;
        Ok(())
    }
}

/// DuckDB-backed local store. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl DuckDbStore {
    /// Opens or creates a store at the given path with default limits.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_limits(path, &DuckDbLimits::default())
    }

    /// Opens or creates a store at the given path.
    ///
    /// A crash can leave a write-ahead log that stops the file from opening.
    /// When that happens and a WAL exists, the WAL is discarded and the open
    /// is retried once; writes not yet checkpointed are lost.
    pub fn open_with_limits(path: &Path, limits: &DuckDbLimits) -> StorageResult<Self> {
        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(e) => reopen_without_wal(path, e)?,
        };
        limits.apply(&conn)?;
        initialize_record_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_record_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Path of the database file, if on disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bytes used on disk by the database file and its WAL. Zero in memory.
    pub fn disk_usage(&self) -> StorageResult<u64> {
        let Some(path) = &self.path else {
            return Ok(0);
        };
        let mut total = 0;
        for file in [path.clone(), wal_path(path)] {
            match std::fs::metadata(&file) {
                Ok(meta) => total += meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    /// Runs a checkpoint to fold the WAL into the database file.
    pub fn checkpoint(&self) -> StorageResult<()> {
        self.lock_conn().execute_batch("CHECKPOINT")?;
        Ok(())
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("DuckDbStore recovering from poisoned mutex");
            poisoned.into_inner()
        })
    }
}

/// Path of the write-ahead log DuckDB keeps next to `path`.
fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".wal");
    PathBuf::from(name)
}

fn reopen_without_wal(path: &Path, open_err: duckdb::Error) -> StorageResult<Connection> {
    let wal = wal_path(path);
    if !wal.exists() {
        return Err(open_err.into());
    }
    warn!(
        "cannot open {} ({open_err}), discarding stale WAL {}",
        path.display(),
        wal.display()
    );
    std::fs::remove_file(&wal)?;
    Ok(Connection::open(path)?)
}

fn initialize_record_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            tbl VARCHAR NOT NULL,
            key VARCHAR NOT NULL,
            data_json VARCHAR NOT NULL,
            PRIMARY KEY (tbl, key)
        );

        CREATE TABLE IF NOT EXISTS record_index_entries (
            tbl VARCHAR NOT NULL,
            index_name VARCHAR NOT NULL,
            key VARCHAR NOT NULL,
            sort_key VARCHAR NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_record_index_lookup
            ON record_index_entries(tbl, index_name, sort_key);

        CREATE TABLE IF NOT EXISTS table_sequences (
            tbl VARCHAR PRIMARY KEY,
            next_id BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn current_sequence(conn: &Connection, table: Table) -> StorageResult<u64> {
    let result = conn.query_row(
        "SELECT next_id FROM table_sequences WHERE tbl = ?",
        params![table.name()],
        |row| row.get::<_, i64>(0),
    );
    match result {
        Ok(v) => Ok(v.max(0) as u64),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn store_sequence(conn: &Connection, table: Table, value: u64) -> StorageResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO table_sequences (tbl, next_id) VALUES (?, ?)",
        params![table.name(), value as i64],
    )?;
    Ok(())
}

/// Writes a record, its index entries and the advanced sequence. Callers run
/// this inside a transaction so a failure leaves none of them behind.
fn write_record(conn: &Connection, table: Table, mut record: Value) -> StorageResult<String> {
    let schema = table.schema();

    let current = if schema.auto_increment {
        current_sequence(conn, table)?
    } else {
        0
    };
    let key = assign_key(table, &mut record, || current + 1)?;
    if schema.auto_increment {
        if let Ok(id) = key.parse::<u64>() {
            if id > current {
                store_sequence(conn, table, id)?;
            }
        }
    }

    let data_json = serde_json::to_string(&record)?;
    conn.execute(
        "INSERT OR REPLACE INTO records (tbl, key, data_json) VALUES (?, ?, ?)",
        params![table.name(), key, data_json],
    )?;

    conn.execute(
        "DELETE FROM record_index_entries WHERE tbl = ? AND key = ?",
        params![table.name(), key],
    )?;
    for spec in schema.indexes {
        if let Some(value) = IndexValue::extract(spec, &record) {
            conn.execute(
                "INSERT INTO record_index_entries (tbl, index_name, key, sort_key) VALUES (?, ?, ?, ?)",
                params![table.name(), spec.name, key, value.sort_key()],
            )?;
        }
    }
    Ok(key)
}

#[async_trait]
impl LocalStore for DuckDbStore {
    async fn get(&self, table: Table, key: &str) -> StorageResult<Option<Value>> {
        let conn = self.lock_conn();
        let result = conn.query_row(
            "SELECT data_json FROM records WHERE tbl = ? AND key = ?",
            params![table.name(), key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, table: Table, record: Value) -> StorageResult<String> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        let key = write_record(&tx, table, record)?;
        tx.commit()?;
        debug!("put {table}/{key}");
        Ok(key)
    }

    async fn get_all(&self, table: Table) -> StorageResult<Vec<Value>> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare("SELECT data_json FROM records WHERE tbl = ? ORDER BY key")?;
        let rows: Vec<String> = stmt
            .query_map(params![table.name()], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(Into::into))
            .collect()
    }

    async fn delete(&self, table: Table, key: &str) -> StorageResult<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM record_index_entries WHERE tbl = ? AND key = ?",
            params![table.name(), key],
        )?;
        tx.execute(
            "DELETE FROM records WHERE tbl = ? AND key = ?",
            params![table.name(), key],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn count(&self, table: Table) -> StorageResult<usize> {
        let conn = self.lock_conn();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE tbl = ?",
            params![table.name()],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(n as usize)
    }

    async fn seek_index(
        &self,
        table: Table,
        index: &str,
        after: Option<&IndexPosition>,
        upper: Bound<&IndexValue>,
    ) -> StorageResult<Option<(IndexPosition, Value)>> {
        let spec = table.index(index)?;
        // Every sort key starts with '0' or '1', so ("", "") precedes all entries.
        let (after_sort, after_key) = after
            .map(|p| (p.value.sort_key(), p.key.clone()))
            .unwrap_or_default();

        let mut sql = String::from(
            r#"
            SELECT e.key, r.data_json
            FROM record_index_entries e
            JOIN records r ON r.tbl = e.tbl AND r.key = e.key
            WHERE e.tbl = ? AND e.index_name = ?
              AND (e.sort_key > ? OR (e.sort_key = ? AND e.key > ?))
            "#,
        );
        let upper_sort = match upper {
            Bound::Included(v) => {
                sql.push_str(" AND e.sort_key <= ?");
                Some(v.sort_key())
            }
            Bound::Excluded(v) => {
                sql.push_str(" AND e.sort_key < ?");
                Some(v.sort_key())
            }
            Bound::Unbounded => None,
        };
        sql.push_str(" ORDER BY e.sort_key, e.key LIMIT 1");

        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &duckdb::Row<'_>| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        };
        let mut rows = match &upper_sort {
            Some(bound) => stmt
                .query_map(
                    params![table.name(), spec.name, after_sort, after_sort, after_key, bound],
                    map_row,
                )?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(
                    params![table.name(), spec.name, after_sort, after_sort, after_key],
                    map_row,
                )?
                .collect::<Result<Vec<_>, _>>()?,
        };

        let Some((key, data_json)) = rows.pop() else {
            return Ok(None);
        };
        let record: Value = serde_json::from_str(&data_json)?;
        let Some(value) = IndexValue::extract(spec, &record) else {
            return Ok(None);
        };
        Ok(Some((IndexPosition { value, key }, record)))
    }
}
