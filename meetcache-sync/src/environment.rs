//! Host seams: connectivity, storage quota, time, and error tracking.

use crate::error::{SyncError, SyncResult};
use crate::types::SyncQueueItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meetcache_store::DuckDbStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

/// Local storage usage as reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
    pub usage: u64,
    pub quota: u64,
}

impl StorageEstimate {
    /// `usage / quota`; zero when the host reports no quota.
    pub fn ratio(&self) -> f64 {
        if self.quota == 0 {
            0.0
        } else {
            self.usage as f64 / self.quota as f64
        }
    }
}

/// The host the engine runs in.
#[async_trait]
pub trait HostEnvironment: Send + Sync {
    fn is_online(&self) -> bool;

    async fn storage_estimate(&self) -> SyncResult<StorageEstimate>;
}

/// Host environment backed by a DuckDB file and a fixed byte quota.
pub struct FileQuotaEnvironment {
    store: DuckDbStore,
    quota_bytes: u64,
    online: AtomicBool,
}

impl FileQuotaEnvironment {
    pub fn new(store: DuckDbStore, quota_bytes: u64) -> Self {
        Self {
            store,
            quota_bytes,
            online: AtomicBool::new(true),
        }
    }

    /// Updates connectivity, e.g. from a network change listener.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl HostEnvironment for FileQuotaEnvironment {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn storage_estimate(&self) -> SyncResult<StorageEstimate> {
        Ok(StorageEstimate {
            usage: self.store.disk_usage()?,
            quota: self.quota_bytes,
        })
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Receives queue items that reached a terminal failure.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, item: &SyncQueueItem, error: &SyncError);
}

/// Reports terminal failures as `tracing` errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, item: &SyncQueueItem, error: &SyncError) {
        error!(
            item_id = ?item.id,
            table = %item.table_name,
            record_id = %item.record_id,
            operation = %item.operation,
            attempts = item.attempts,
            "sync item failed permanently: {error}"
        );
    }
}
