//! Local record store for meetcache.
//!
//! Provides a generic per-table key/value store behind the [`LocalStore`]
//! trait, with two backends:
//!
//! - [`MemoryStore`]: ordered maps in process memory
//! - [`DuckDbStore`]: a DuckDB file, records stored as JSON with a side table
//!   of secondary index entries
//!
//! # Architecture
//!
//! - Tables are a closed registry ([`Table`]) with static schemas
//! - Secondary indexes are scanned lazily through [`IndexCursor`], which
//!   tolerates deleting the current record while iterating
//! - Writes are last-writer-wins; there is no per-key locking

mod duck_store;
mod error;
mod index;
mod local_store;
mod memory_store;
mod table;

pub use duck_store::{DuckDbLimits, DuckDbStore};
pub use error::{StorageError, StorageResult};
pub use index::{IndexCursor, IndexPosition, IndexValue};
pub use local_store::LocalStore;
pub use memory_store::MemoryStore;
pub use table::{IndexSpec, Table, TableRecord, TableSchema};
