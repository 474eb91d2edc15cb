//! The durable outbound queue.
//!
//! Items live in the store's `sync_queue` table, so the queue is exactly as
//! durable as the store. Enqueueing never deduplicates: two edits to the same
//! record are two items, replayed in FIFO order.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::types::{
    ConflictRecord, Operation, QueueStats, QueueStatus, RecordSyncState, SyncQueueItem,
};
use chrono::{DateTime, Duration, Utc};
use meetcache_store::{LocalStore, Table};
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct SyncQueue {
    ctx: SyncContext,
}

impl SyncQueue {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    fn store(&self) -> &dyn LocalStore {
        self.ctx.store.as_ref()
    }

    /// Appends a pending mutation and returns it with its assigned id.
    pub async fn enqueue(
        &self,
        table: Table,
        record_id: &str,
        operation: Operation,
        payload: Value,
    ) -> SyncResult<SyncQueueItem> {
        if table.remote_resource().is_none() {
            return Err(SyncError::LocalOnlyTable(table));
        }
        let mut item = SyncQueueItem::new(table, record_id, operation, payload, self.ctx.now());
        let key = self.store().put_record(&item).await?;
        item.id = key.parse().ok();
        debug!("enqueued {operation} {table}/{record_id} as item {key}");
        Ok(item)
    }

    pub async fn get_item(&self, id: u64) -> SyncResult<Option<SyncQueueItem>> {
        Ok(self.store().get_record(&id.to_string()).await?)
    }

    /// Writes back an item after a state transition.
    pub async fn save(&self, item: &SyncQueueItem) -> SyncResult<()> {
        self.store().put_record(item).await?;
        Ok(())
    }

    /// Every item, in FIFO order. Rows that no longer parse are skipped.
    pub async fn all_items(&self) -> SyncResult<Vec<SyncQueueItem>> {
        let rows = self.store().get_all(Table::SyncQueue).await?;
        let mut items: Vec<SyncQueueItem> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<SyncQueueItem>(row) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("skipping unreadable sync queue row: {e}");
                    None
                }
            })
            .collect();
        sort_fifo(&mut items);
        Ok(items)
    }

    pub async fn items_with_status(&self, status: QueueStatus) -> SyncResult<Vec<SyncQueueItem>> {
        let mut items = self.all_items().await?;
        items.retain(|item| item.status == status);
        Ok(items)
    }

    /// Pending items in FIFO order, due or not.
    pub async fn pending_items(&self) -> SyncResult<Vec<SyncQueueItem>> {
        self.items_with_status(QueueStatus::Pending).await
    }

    /// Pending items whose retry time has come (or that were never tried),
    /// in FIFO order.
    pub async fn due_items(&self, now: DateTime<Utc>) -> SyncResult<Vec<SyncQueueItem>> {
        let mut items = self.all_items().await?;
        items.retain(|item| item.is_due(now));
        Ok(items)
    }

    pub async fn stats(&self) -> SyncResult<QueueStats> {
        let mut stats = QueueStats::default();
        for item in self.all_items().await? {
            stats.record(item.status);
        }
        Ok(stats)
    }

    /// Conflicts awaiting a user decision, one per conflicted item.
    pub async fn get_pending_conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        Ok(self
            .items_with_status(QueueStatus::Conflict)
            .await?
            .iter()
            .filter_map(SyncQueueItem::conflict_record)
            .collect())
    }

    /// Where a record stands, judged by its most recent queue item.
    pub async fn record_state(&self, table: Table, record_id: &str) -> SyncResult<RecordSyncState> {
        let latest = self
            .all_items()
            .await?
            .into_iter()
            .rfind(|item| item.table_name == table && item.record_id == record_id);
        Ok(match latest.map(|item| item.status) {
            None => RecordSyncState::LocalOnly,
            Some(QueueStatus::Pending) => RecordSyncState::Queued,
            Some(QueueStatus::Synced | QueueStatus::Resolved) => RecordSyncState::Synced,
            Some(QueueStatus::Conflict) => RecordSyncState::Conflict,
            Some(QueueStatus::Failed) => RecordSyncState::Failed,
        })
    }

    /// Deletes `synced` items older than `retention`, returning how many.
    ///
    /// Age is measured from `synced_at`, or `created_at` for items synced
    /// before that field existed.
    pub async fn cleanup_synced(&self, retention: Duration) -> SyncResult<usize> {
        let cutoff = self.ctx.now() - retention;
        let mut cursor = self.store().entries_equal_to(
            Table::SyncQueue,
            "status",
            QueueStatus::Synced.to_string().into(),
        );

        let mut purged = 0;
        while let Some(row) = cursor.next().await? {
            let Ok(item) = serde_json::from_value::<SyncQueueItem>(row) else {
                continue;
            };
            if item.synced_at.unwrap_or(item.created_at) < cutoff {
                cursor.delete_current().await?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!("purged {purged} synced queue items older than {cutoff}");
        }
        Ok(purged)
    }
}

/// Oldest first; insertion id breaks timestamp ties.
pub(crate) fn sort_fifo(items: &mut [SyncQueueItem]) {
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
