//! Storage quota enforcement and routine eviction.

use crate::context::SyncContext;
use crate::environment::StorageEstimate;
use crate::error::SyncResult;
use crate::queue::SyncQueue;
use crate::types::iso8601;
use chrono::Duration;
use meetcache_store::{IndexValue, LocalStore, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Bound;
use tracing::{debug, info, warn};

/// Which purge a quota check ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgeTier {
    None,
    Moderate,
    Aggressive,
}

/// Outcome of [`QuotaManager::check_storage_quota`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotaReport {
    pub estimate: StorageEstimate,
    pub ratio: f64,
    pub tier: PurgeTier,
    pub notes_purged: usize,
    pub prep_cache_purged: usize,
    pub contacts_evicted: usize,
}

/// Outcome of [`QuotaManager::run_maintenance`]. The quota check's own
/// purges are reported in `quota`, not folded into the other counts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub quota: QuotaReport,
    pub notes_purged: usize,
    pub prep_cache_purged: usize,
    pub contacts_evicted: usize,
    pub queue_items_purged: usize,
}

#[derive(Clone)]
pub struct QuotaManager {
    ctx: SyncContext,
}

impl QuotaManager {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    fn store(&self) -> &dyn LocalStore {
        self.ctx.store.as_ref()
    }

    /// Measures usage and runs the purge tier it calls for.
    pub async fn check_storage_quota(&self) -> SyncResult<QuotaReport> {
        let estimate = self.ctx.env.storage_estimate().await?;
        let ratio = estimate.ratio();
        let config = &self.ctx.config;

        let mut report = QuotaReport {
            estimate,
            ratio,
            tier: PurgeTier::None,
            notes_purged: 0,
            prep_cache_purged: 0,
            contacts_evicted: 0,
        };

        if ratio > config.aggressive_ratio {
            warn!(
                "storage at {:.1}% of quota, running aggressive purge",
                ratio * 100.0
            );
            report.tier = PurgeTier::Aggressive;
            report.notes_purged = self.purge_old_notes(config.aggressive_note_age_days).await?;
            report.prep_cache_purged = self.purge_expired_prep_cache().await?;
            report.contacts_evicted = self.enforce_contact_limit().await?;
        } else if ratio > config.moderate_ratio {
            info!(
                "storage at {:.1}% of quota, running moderate purge",
                ratio * 100.0
            );
            report.tier = PurgeTier::Moderate;
            report.notes_purged = self.purge_old_notes(config.moderate_note_age_days).await?;
            report.prep_cache_purged = self.purge_expired_prep_cache().await?;
        } else {
            debug!("storage at {:.1}% of quota", ratio * 100.0);
        }
        Ok(report)
    }

    /// Deletes notes whose `date` is more than `days` days ago.
    pub async fn purge_old_notes(&self, days: i64) -> SyncResult<usize> {
        let cutoff = iso8601::format(&(self.ctx.now() - Duration::days(days)));
        let purged = self
            .delete_text_range(Table::Notes, "date", IndexValue::Text(cutoff))
            .await?;
        if purged > 0 {
            info!("purged {purged} notes older than {days} days");
        }
        Ok(purged)
    }

    /// Deletes prep cache entries whose `expires_at` has passed.
    pub async fn purge_expired_prep_cache(&self) -> SyncResult<usize> {
        let now = iso8601::format(&self.ctx.now());
        let purged = self
            .delete_text_range(Table::PrepCache, "expires_at", IndexValue::Text(now))
            .await?;
        if purged > 0 {
            info!("purged {purged} expired prep cache entries");
        }
        Ok(purged)
    }

    /// Deletes every record whose timestamp index value sorts strictly
    /// before `cutoff`. Integer-valued entries are not timestamps in this
    /// format and are left alone.
    async fn delete_text_range(
        &self,
        table: Table,
        index: &str,
        cutoff: IndexValue,
    ) -> SyncResult<usize> {
        let field = table.index(index)?.field;
        let mut cursor = self
            .store()
            .range_by_index(table, index, Bound::Excluded(cutoff));

        let mut purged = 0;
        while let Some(record) = cursor.next().await? {
            if !record.get(field).is_some_and(Value::is_string) {
                continue;
            }
            cursor.delete_current().await?;
            purged += 1;
        }
        Ok(purged)
    }

    /// Evicts the least recently seen contacts until at most `max_contacts`
    /// remain. Contacts never seen fall back to `created_at`; contacts with
    /// neither are evicted first.
    pub async fn enforce_contact_limit(&self) -> SyncResult<usize> {
        let limit = self.ctx.config.max_contacts;
        let total = self.store().count(Table::Contacts).await?;
        if total <= limit {
            return Ok(0);
        }

        let mut contacts: Vec<(Option<IndexValue>, String)> = self
            .store()
            .get_all(Table::Contacts)
            .await?
            .iter()
            .filter_map(|c| Some((contact_recency(c), Table::Contacts.key_of(c)?)))
            .collect();
        contacts.sort();

        let overflow = contacts.len().saturating_sub(limit);
        for (_, key) in contacts.iter().take(overflow) {
            self.store().delete(Table::Contacts, key).await?;
        }
        info!("evicted {overflow} contacts over the limit of {limit}");
        Ok(overflow)
    }

    /// The daily housekeeping run.
    pub async fn run_maintenance(&self) -> SyncResult<MaintenanceReport> {
        let config = &self.ctx.config;
        let quota = self.check_storage_quota().await?;
        let notes_purged = self.purge_old_notes(config.maintenance_note_age_days).await?;
        let prep_cache_purged = self.purge_expired_prep_cache().await?;
        let contacts_evicted = self.enforce_contact_limit().await?;
        let queue_items_purged = SyncQueue::new(self.ctx.clone())
            .cleanup_synced(Duration::days(config.synced_retention_days))
            .await?;

        let report = MaintenanceReport {
            quota,
            notes_purged,
            prep_cache_purged,
            contacts_evicted,
            queue_items_purged,
        };
        info!(
            "maintenance done: {} notes, {} prep cache entries, {} contacts, {} queue items removed",
            report.notes_purged,
            report.prep_cache_purged,
            report.contacts_evicted,
            report.queue_items_purged
        );
        Ok(report)
    }
}

fn contact_recency(contact: &Value) -> Option<IndexValue> {
    ["last_seen_at", "created_at"]
        .iter()
        .find_map(|field| match contact.get(field)? {
            Value::String(s) => Some(IndexValue::Text(s.clone())),
            Value::Number(n) => n.as_i64().map(IndexValue::Integer),
            _ => None,
        })
}
