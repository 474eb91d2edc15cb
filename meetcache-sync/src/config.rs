//! Sync engine configuration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Tunables for the queue, the engine and quota eviction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Failed attempts after which a queue item is terminally `failed`.
    pub max_retry_attempts: u32,

    /// Backoff base: the delay after the first failure.
    pub retry_base_delay_ms: u64,

    /// `synced` queue items older than this are deleted.
    pub synced_retention_days: i64,

    /// Upper bound on cached contacts.
    pub max_contacts: usize,

    /// Usage ratio above which the moderate purge runs.
    pub moderate_ratio: f64,

    /// Usage ratio above which the aggressive purge runs.
    pub aggressive_ratio: f64,

    pub aggressive_note_age_days: i64,
    pub moderate_note_age_days: i64,
    /// Note age purged by the daily maintenance run regardless of pressure.
    pub maintenance_note_age_days: i64,

    /// Interval between scheduled sync passes (seconds).
    pub sync_interval_secs: u64,

    /// Interval between maintenance runs (seconds).
    pub maintenance_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_base_delay_ms: 1000,
            synced_retention_days: 7,
            max_contacts: 500,
            moderate_ratio: 0.8,
            aggressive_ratio: 0.9,
            aggressive_note_age_days: 30,
            moderate_note_age_days: 60,
            maintenance_note_age_days: 90,
            sync_interval_secs: 60,
            maintenance_interval_secs: 24 * 60 * 60,
        }
    }
}

impl SyncConfig {
    /// Delay before the next attempt after `attempts` failures:
    /// 1s, 2s, 4s, ... with the default base.
    pub fn backoff_delay(&self, attempts: u32) -> chrono::Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let millis = self.retry_base_delay_ms.saturating_mul(1u64 << exponent);
        chrono::Duration::milliseconds(millis.min(i64::MAX as u64) as i64)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.max_retry_attempts == 0 {
            return Err(SyncError::Config(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0 < self.moderate_ratio
            && self.moderate_ratio < self.aggressive_ratio
            && self.aggressive_ratio <= 1.0)
        {
            return Err(SyncError::Config(format!(
                "quota thresholds out of order: moderate {} / aggressive {}",
                self.moderate_ratio, self.aggressive_ratio
            )));
        }
        if self.aggressive_note_age_days > self.moderate_note_age_days {
            return Err(SyncError::Config(
                "aggressive purge must not keep notes longer than moderate purge".to_string(),
            ));
        }
        if self.sync_interval_secs == 0 || self.maintenance_interval_secs == 0 {
            return Err(SyncError::Config("scheduler intervals must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Connection settings for the REST backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the backend (e.g., "https://db.meetcache.app").
    pub api_base_url: String,

    /// Project API key sent as the `apikey` header, if the backend wants one.
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://db.meetcache.app".to_string(),
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}
