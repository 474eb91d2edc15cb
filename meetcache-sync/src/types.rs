//! Queue item model and shared sync types.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Duration, Utc};
use meetcache_store::{Table, TableRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A mutation to replay against the remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Upsert,
    Update,
    Delete,
    /// Multi-record consolidation (contact de-duplication). Accepted into the
    /// queue but has no remote counterpart.
    Merge,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => write!(f, "insert"),
            Operation::Upsert => write!(f, "upsert"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Merge => write!(f, "merge"),
        }
    }
}

/// Lifecycle status of a queue item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Synced,
    Conflict,
    Failed,
    Resolved,
}

impl QueueStatus {
    /// Terminal statuses never transition automatically.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueStatus::Synced | QueueStatus::Failed | QueueStatus::Resolved
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueStatus::Pending => write!(f, "pending"),
            QueueStatus::Synced => write!(f, "synced"),
            QueueStatus::Conflict => write!(f, "conflict"),
            QueueStatus::Failed => write!(f, "failed"),
            QueueStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// The user's choice for a conflicted record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepLocal,
    KeepServer,
}

/// Both sides of a detected conflict, stored on the queue item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictData {
    pub local: Value,
    pub server: Value,
}

/// A record whose queued edit diverged from a newer server version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub record_id: String,
    pub record_type: Table,
    pub local_version: Value,
    pub server_version: Value,
    pub queue_item_id: Option<u64>,
}

/// Where a record stands relative to the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSyncState {
    /// Written locally, never enqueued.
    LocalOnly,
    /// Latest mutation is waiting in the queue.
    Queued,
    Synced,
    Conflict,
    Failed,
}

/// A pending mutation in the outbound queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Assigned by the store on first write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub table_name: Table,
    pub record_id: String,
    pub operation: Operation,
    pub payload: Value,
    pub status: QueueStatus,
    pub attempts: u32,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "iso8601::option")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default, with = "iso8601::option")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default, with = "iso8601::option")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conflict_data: Option<ConflictData>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TableRecord for SyncQueueItem {
    const TABLE: Table = Table::SyncQueue;
}

impl SyncQueueItem {
    pub fn new(
        table: Table,
        record_id: impl Into<String>,
        operation: Operation,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            table_name: table,
            record_id: record_id.into(),
            operation,
            payload,
            status: QueueStatus::Pending,
            attempts: 0,
            created_at: now,
            next_retry_at: None,
            synced_at: None,
            resolved_at: None,
            conflict_data: None,
            resolution: None,
            error: None,
        }
    }

    /// Pending and past its retry time (or never attempted).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.next_retry_at.is_none_or(|t| t <= now)
    }

    fn transition(&mut self, expected: QueueStatus, to: QueueStatus) -> SyncResult<()> {
        if self.status != expected {
            return Err(SyncError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// pending → synced
    pub fn mark_synced(&mut self, now: DateTime<Utc>) -> SyncResult<()> {
        self.transition(QueueStatus::Pending, QueueStatus::Synced)?;
        self.synced_at = Some(now);
        self.next_retry_at = None;
        self.error = None;
        Ok(())
    }

    /// pending → conflict
    pub fn mark_conflict(&mut self, data: ConflictData) -> SyncResult<()> {
        self.transition(QueueStatus::Pending, QueueStatus::Conflict)?;
        self.conflict_data = Some(data);
        self.next_retry_at = None;
        Ok(())
    }

    /// Counts a failed attempt: pending → pending (with backoff) while
    /// attempts remain, pending → failed once `max_attempts` is reached.
    pub fn record_failure(
        &mut self,
        error: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
        backoff: impl Fn(u32) -> Duration,
    ) -> SyncResult<()> {
        if self.status != QueueStatus::Pending {
            return Err(SyncError::InvalidTransition {
                from: self.status,
                to: QueueStatus::Pending,
            });
        }
        self.attempts += 1;
        self.error = Some(error.to_string());
        if self.attempts >= max_attempts {
            self.status = QueueStatus::Failed;
            self.next_retry_at = None;
        } else {
            self.next_retry_at = Some(now + backoff(self.attempts));
        }
        Ok(())
    }

    /// pending → failed without further attempts.
    pub fn mark_failed(&mut self, error: &str) -> SyncResult<()> {
        self.transition(QueueStatus::Pending, QueueStatus::Failed)?;
        self.error = Some(error.to_string());
        self.next_retry_at = None;
        Ok(())
    }

    /// conflict → resolved
    pub fn mark_resolved(&mut self, resolution: Resolution, now: DateTime<Utc>) -> SyncResult<()> {
        self.transition(QueueStatus::Conflict, QueueStatus::Resolved)?;
        self.resolution = Some(resolution);
        self.resolved_at = Some(now);
        Ok(())
    }

    /// The conflict this item is parked on, if any.
    pub fn conflict_record(&self) -> Option<ConflictRecord> {
        if self.status != QueueStatus::Conflict {
            return None;
        }
        let data = self.conflict_data.as_ref()?;
        Some(ConflictRecord {
            record_id: self.record_id.clone(),
            record_type: self.table_name,
            local_version: data.local.clone(),
            server_version: data.server.clone(),
            queue_item_id: self.id,
        })
    }
}

/// Item counts per status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub synced: usize,
    pub conflict: usize,
    pub failed: usize,
    pub resolved: usize,
}

impl QueueStats {
    pub fn record(&mut self, status: QueueStatus) {
        match status {
            QueueStatus::Pending => self.pending += 1,
            QueueStatus::Synced => self.synced += 1,
            QueueStatus::Conflict => self.conflict += 1,
            QueueStatus::Failed => self.failed += 1,
            QueueStatus::Resolved => self.resolved += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.synced + self.conflict + self.failed + self.resolved
    }
}

/// Sync status reported to the UI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub online: bool,
    pub queue: QueueStats,
}

/// Outcome of one `process_offline_sync_queue` pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPassReport {
    /// The pass was skipped because the host is offline.
    pub offline: bool,
    pub attempted: usize,
    pub synced: usize,
    /// Failed this pass but will be retried.
    pub retrying: usize,
    /// Reached a terminal failure this pass.
    pub failed: usize,
    /// Items whose outcome, or whose local copy after a successful remote
    /// write, could not be stored locally.
    pub errored: usize,
    pub conflicts: Vec<ConflictRecord>,
    pub purged_synced: usize,
}

/// ISO-8601 (RFC 3339, millisecond precision, `Z` suffix) timestamps.
///
/// A fixed width keeps stored timestamps lexicographically ordered.
pub mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(s) => super::parse(&s).map(Some).map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}
