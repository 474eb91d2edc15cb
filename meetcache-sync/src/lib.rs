//! Offline sync engine for meetcache.
//!
//! Mutations are written to the local store first and queued; this crate
//! replays them against the remote data API when the host is online:
//! - Durable FIFO outbound queue with per-item retry and exponential backoff
//! - Version-gated upserts that park divergent edits as conflicts
//! - User-driven conflict resolution (keep local / keep server)
//! - Storage quota tiers and routine eviction of stale records
//! - PostgREST-style REST client for the remote
//! - Background scheduler for periodic passes and maintenance

pub mod config;
pub mod conflict;
pub mod context;
pub mod engine;
pub mod environment;
pub mod error;
pub mod queue;
pub mod quota;
pub mod remote;
pub mod rest_remote;
pub mod scheduler;
pub mod types;

pub use config::{RemoteConfig, SyncConfig};
pub use conflict::ConflictResolver;
pub use context::SyncContext;
pub use engine::SyncEngine;
pub use environment::{
    Clock, ErrorReporter, FileQuotaEnvironment, HostEnvironment, StorageEstimate, SystemClock,
    TracingErrorReporter,
};
pub use error::{SyncError, SyncResult};
pub use queue::SyncQueue;
pub use quota::{MaintenanceReport, PurgeTier, QuotaManager, QuotaReport};
pub use remote::RemoteStore;
pub use rest_remote::RestRemoteStore;
pub use scheduler::{
    SchedulerCommand, SchedulerEvent, SchedulerHandle, SyncScheduler, create_sync_scheduler,
};
pub use types::*;
