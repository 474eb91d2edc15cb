//! Replays the outbound queue against the remote.
//!
//! A pass is one FIFO walk over every due `pending` item. Each item is
//! isolated: its outcome is recorded on the item and a failure never stops the
//! walk. Items move `pending → synced | conflict | pending (retry) | failed`.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::queue::SyncQueue;
use crate::quota::QuotaManager;
use crate::remote::record_version;
use crate::types::{
    ConflictData, ConflictRecord, Operation, SyncPassReport, SyncQueueItem, SyncStatus,
};
use chrono::Duration;
use meetcache_store::StorageResult;
use serde_json::Value;
use tracing::{debug, info, warn};

/// What the remote made of one item.
enum Dispatch {
    /// The remote accepted the write. `cache_failed` is set when the local
    /// copy could not be brought in line afterwards.
    Applied { cache_failed: bool },
    Conflict(ConflictData),
}

/// How one item left the pass.
enum ItemOutcome {
    Synced { cache_failed: bool },
    Conflict(ConflictRecord),
    Retrying,
    Failed,
}

#[derive(Clone)]
pub struct SyncEngine {
    ctx: SyncContext,
    queue: SyncQueue,
    quota: QuotaManager,
}

impl SyncEngine {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            queue: SyncQueue::new(ctx.clone()),
            quota: QuotaManager::new(ctx.clone()),
            ctx,
        }
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }

    pub async fn sync_status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            online: self.ctx.env.is_online(),
            queue: self.queue.stats().await?,
        })
    }

    /// Runs one full sync pass.
    ///
    /// Offline, this returns immediately without touching the queue.
    /// Otherwise it checks the storage quota, replays every due item in FIFO
    /// order, then drops `synced` items past the retention window.
    pub async fn process_offline_sync_queue(&self) -> SyncResult<SyncPassReport> {
        if !self.ctx.env.is_online() {
            debug!("offline, skipping sync pass");
            return Ok(SyncPassReport {
                offline: true,
                ..Default::default()
            });
        }

        self.quota.check_storage_quota().await?;

        let items = self.queue.due_items(self.ctx.now()).await?;
        let mut report = SyncPassReport::default();
        self.process_items(items, &mut report).await;

        report.purged_synced = self
            .queue
            .cleanup_synced(Duration::days(self.ctx.config.synced_retention_days))
            .await?;

        info!(
            "sync pass done: {} attempted, {} synced, {} retrying, {} failed, {} conflicts",
            report.attempted,
            report.synced,
            report.retrying,
            report.failed,
            report.conflicts.len()
        );
        Ok(report)
    }

    /// Replays only items waiting on a backoff that has now elapsed.
    pub async fn retry_due_items(&self) -> SyncResult<SyncPassReport> {
        if !self.ctx.env.is_online() {
            return Ok(SyncPassReport {
                offline: true,
                ..Default::default()
            });
        }

        let mut items = self.queue.due_items(self.ctx.now()).await?;
        items.retain(|item| item.next_retry_at.is_some());

        let mut report = SyncPassReport::default();
        self.process_items(items, &mut report).await;
        debug!(
            "retry sweep done: {} attempted, {} synced",
            report.attempted, report.synced
        );
        Ok(report)
    }

    async fn process_items(&self, items: Vec<SyncQueueItem>, report: &mut SyncPassReport) {
        for item in items {
            report.attempted += 1;
            let id = item.id;
            match self.process_item(item).await {
                Ok(ItemOutcome::Synced { cache_failed }) => {
                    report.synced += 1;
                    if cache_failed {
                        report.errored += 1;
                    }
                }
                Ok(ItemOutcome::Conflict(record)) => report.conflicts.push(record),
                Ok(ItemOutcome::Retrying) => report.retrying += 1,
                Ok(ItemOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    warn!("could not record outcome of queue item {id:?}: {e}");
                    report.errored += 1;
                }
            }
        }
    }

    /// Dispatches one item and persists its new state.
    ///
    /// Once the remote has accepted a write the item is `synced`, even if
    /// refreshing the local copy failed; replaying it would repeat the write.
    /// A storage error while saving the item itself leaves it `pending` with
    /// its attempt count unchanged.
    async fn process_item(&self, mut item: SyncQueueItem) -> SyncResult<ItemOutcome> {
        let result = self.dispatch(&item).await;
        let now = self.ctx.now();

        let outcome = match result {
            Ok(Dispatch::Applied { cache_failed }) => {
                item.mark_synced(now)?;
                ItemOutcome::Synced { cache_failed }
            }
            Ok(Dispatch::Conflict(data)) => {
                let record = ConflictRecord {
                    record_id: item.record_id.clone(),
                    record_type: item.table_name,
                    local_version: data.local.clone(),
                    server_version: data.server.clone(),
                    queue_item_id: item.id,
                };
                item.mark_conflict(data)?;
                info!(
                    "conflict on {}/{}: server has a newer version",
                    item.table_name, item.record_id
                );
                ItemOutcome::Conflict(record)
            }
            Err(e @ SyncError::Storage(_)) => return Err(e),
            Err(e) if e.is_retryable() => {
                let config = &self.ctx.config;
                item.record_failure(&e.to_string(), now, config.max_retry_attempts, |n| {
                    config.backoff_delay(n)
                })?;
                if item.status.is_terminal() {
                    self.ctx.reporter.report(&item, &e);
                    ItemOutcome::Failed
                } else {
                    debug!(
                        "queue item {:?} failed (attempt {}), retrying at {:?}: {e}",
                        item.id, item.attempts, item.next_retry_at
                    );
                    ItemOutcome::Retrying
                }
            }
            Err(e) => {
                item.mark_failed(&e.to_string())?;
                self.ctx.reporter.report(&item, &e);
                ItemOutcome::Failed
            }
        };

        self.queue.save(&item).await?;
        Ok(outcome)
    }

    async fn dispatch(&self, item: &SyncQueueItem) -> SyncResult<Dispatch> {
        let table = item.table_name;
        if table.remote_resource().is_none() {
            return Err(SyncError::LocalOnlyTable(table));
        }
        let remote = &self.ctx.remote;

        match item.operation {
            Operation::Insert => {
                require_object(&item.payload)?;
                let row = remote.insert(table, &item.payload).await?;
                Ok(settle_locally(item, self.ctx.store.put(table, row).await.map(drop)))
            }
            Operation::Upsert => {
                require_object(&item.payload)?;
                if table.is_version_tracked() {
                    let local_version = record_version(&item.payload);
                    if let Some(server) = remote
                        .fetch_by_key_and_version(table, &item.record_id, local_version)
                        .await?
                    {
                        return Ok(Dispatch::Conflict(ConflictData {
                            local: item.payload.clone(),
                            server,
                        }));
                    }
                }
                let row = remote.upsert_by_key(table, &item.payload).await?;
                Ok(settle_locally(item, self.ctx.store.put(table, row).await.map(drop)))
            }
            Operation::Update => {
                require_object(&item.payload)?;
                remote.patch(table, &item.record_id, &item.payload).await?;
                Ok(Dispatch::Applied {
                    cache_failed: false,
                })
            }
            Operation::Delete => {
                remote.delete(table, &item.record_id).await?;
                Ok(settle_locally(
                    item,
                    self.ctx.store.delete(table, &item.record_id).await,
                ))
            }
            Operation::Merge => Err(SyncError::UnsupportedOperation(Operation::Merge)),
        }
    }
}

/// Folds the local write that follows an accepted remote write into the
/// dispatch result. The remote side is final, so a local failure is only
/// logged.
fn settle_locally(item: &SyncQueueItem, local: StorageResult<()>) -> Dispatch {
    if let Err(e) = &local {
        warn!(
            "{}/{} synced but the local copy was not updated: {e}",
            item.table_name, item.record_id
        );
    }
    Dispatch::Applied {
        cache_failed: local.is_err(),
    }
}

fn require_object(payload: &Value) -> SyncResult<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(SyncError::InvalidPayload(format!(
            "expected a JSON object, got {payload}"
        )))
    }
}
