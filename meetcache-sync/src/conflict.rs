//! User-driven conflict resolution.

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::queue::SyncQueue;
use crate::remote::record_version;
use crate::types::{ConflictRecord, QueueStatus, Resolution};
use meetcache_store::Table;
use serde_json::{Value, json};
use tracing::info;

#[derive(Clone)]
pub struct ConflictResolver {
    ctx: SyncContext,
    queue: SyncQueue,
}

impl ConflictResolver {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            queue: SyncQueue::new(ctx.clone()),
            ctx,
        }
    }

    /// Settles a conflicted record and returns the version now cached.
    ///
    /// `KeepLocal` pushes `local` with `version = server.version + 1`;
    /// `KeepServer` discards the local edit. Either way every queue item
    /// parked on this record moves to `resolved`. If the push fails the items
    /// stay in `conflict` and the error is returned.
    pub async fn resolve_conflict(
        &self,
        record_id: &str,
        table: Table,
        resolution: Resolution,
        local: &Value,
        server: &Value,
    ) -> SyncResult<Value> {
        let items: Vec<_> = self
            .queue
            .items_with_status(QueueStatus::Conflict)
            .await?
            .into_iter()
            .filter(|item| item.table_name == table && item.record_id == record_id)
            .collect();

        if items.is_empty() {
            return Err(self.not_in_conflict(table, record_id).await?);
        }

        let cached = match resolution {
            Resolution::KeepLocal => {
                let mut payload = local.clone();
                payload
                    .as_object_mut()
                    .ok_or_else(|| {
                        SyncError::InvalidPayload(format!(
                            "local version of {table}/{record_id} is not an object"
                        ))
                    })?
                    .insert("version".to_string(), json!(record_version(server) + 1));
                self.ctx.remote.upsert_by_key(table, &payload).await?
            }
            Resolution::KeepServer => server.clone(),
        };
        self.ctx.store.put(table, cached.clone()).await?;

        let now = self.ctx.now();
        for mut item in items {
            item.mark_resolved(resolution, now)?;
            self.queue.save(&item).await?;
        }
        info!("resolved conflict on {table}/{record_id} with {resolution:?}");
        Ok(cached)
    }

    /// Resolves a conflict as reported by `get_pending_conflicts`.
    pub async fn resolve(
        &self,
        conflict: &ConflictRecord,
        resolution: Resolution,
    ) -> SyncResult<Value> {
        self.resolve_conflict(
            &conflict.record_id,
            conflict.record_type,
            resolution,
            &conflict.local_version,
            &conflict.server_version,
        )
        .await
    }

    /// The error for resolving a record with nothing in conflict.
    async fn not_in_conflict(&self, table: Table, record_id: &str) -> SyncResult<SyncError> {
        let latest = self
            .queue
            .all_items()
            .await?
            .into_iter()
            .rfind(|item| item.table_name == table && item.record_id == record_id);
        Ok(match latest {
            Some(item) => SyncError::InvalidTransition {
                from: item.status,
                to: QueueStatus::Resolved,
            },
            None => SyncError::NotFound(format!("no queued changes for {table}/{record_id}")),
        })
    }
}
