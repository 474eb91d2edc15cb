//! Table registry: the closed set of tables the extension caches locally.
//!
//! Every table has a static schema: its primary key field, its secondary
//! indexes, whether records carry a server `version`, and the remote resource
//! it syncs to. Nothing outside this enum can address the store.

use crate::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A locally cached table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Meetings,
    Notes,
    Contacts,
    PrepCache,
    Settings,
    SyncQueue,
}

/// A named secondary index over a top-level record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub field: &'static str,
}

/// Static description of a table.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    /// Top-level field holding the primary key.
    pub key_path: &'static str,
    /// When set, `put` assigns a monotonic integer key to records without one.
    pub auto_increment: bool,
    pub indexes: &'static [IndexSpec],
    /// Records carry a numeric `version` the server bumps on every write.
    pub version_tracked: bool,
    /// Remote resource name; `None` for tables that never leave the device.
    pub remote: Option<&'static str>,
}

const MEETINGS: TableSchema = TableSchema {
    name: "meetings",
    key_path: "id",
    auto_increment: false,
    indexes: &[IndexSpec { name: "start_time", field: "start_time" }],
    version_tracked: true,
    remote: Some("meetings"),
};

const NOTES: TableSchema = TableSchema {
    name: "notes",
    key_path: "id",
    auto_increment: false,
    indexes: &[
        IndexSpec { name: "date", field: "date" },
        IndexSpec { name: "meeting_id", field: "meeting_id" },
    ],
    version_tracked: true,
    remote: Some("notes"),
};

const CONTACTS: TableSchema = TableSchema {
    name: "contacts",
    key_path: "id",
    auto_increment: false,
    indexes: &[
        IndexSpec { name: "last_seen_at", field: "last_seen_at" },
        IndexSpec { name: "email", field: "email" },
    ],
    version_tracked: false,
    remote: Some("contacts"),
};

const PREP_CACHE: TableSchema = TableSchema {
    name: "prep_cache",
    key_path: "key",
    auto_increment: false,
    indexes: &[IndexSpec { name: "expires_at", field: "expires_at" }],
    version_tracked: false,
    remote: Some("prep_cache"),
};

const SETTINGS: TableSchema = TableSchema {
    name: "settings",
    key_path: "key",
    auto_increment: false,
    indexes: &[],
    version_tracked: false,
    remote: Some("user_settings"),
};

const SYNC_QUEUE: TableSchema = TableSchema {
    name: "sync_queue",
    key_path: "id",
    auto_increment: true,
    indexes: &[
        IndexSpec { name: "status", field: "status" },
        IndexSpec { name: "created_at", field: "created_at" },
    ],
    version_tracked: false,
    remote: None,
};

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Meetings,
        Table::Notes,
        Table::Contacts,
        Table::PrepCache,
        Table::Settings,
        Table::SyncQueue,
    ];

    pub fn schema(self) -> &'static TableSchema {
        match self {
            Table::Meetings => &MEETINGS,
            Table::Notes => &NOTES,
            Table::Contacts => &CONTACTS,
            Table::PrepCache => &PREP_CACHE,
            Table::Settings => &SETTINGS,
            Table::SyncQueue => &SYNC_QUEUE,
        }
    }

    pub fn name(self) -> &'static str {
        self.schema().name
    }

    pub fn key_path(self) -> &'static str {
        self.schema().key_path
    }

    pub fn is_version_tracked(self) -> bool {
        self.schema().version_tracked
    }

    pub fn remote_resource(self) -> Option<&'static str> {
        self.schema().remote
    }

    /// Looks up an index by name.
    pub fn index(self, name: &str) -> StorageResult<&'static IndexSpec> {
        self.schema()
            .indexes
            .iter()
            .find(|idx| idx.name == name)
            .ok_or_else(|| StorageError::UnknownIndex {
                table: self.name(),
                index: name.to_string(),
            })
    }

    /// Extracts the primary key of a record, normalised to a string.
    ///
    /// Returns `None` when the key field is missing, null, or not a string or
    /// integer.
    pub fn key_of(self, record: &Value) -> Option<String> {
        key_to_string(record.get(self.key_path())?)
    }
}

pub(crate) fn key_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| StorageError::InvalidRecord(format!("unknown table '{s}'")))
    }
}

/// A Rust type stored in exactly one table.
pub trait TableRecord: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: Table;
}
