//! Shared test doubles: a manual clock, a scripted remote, a host environment
//! with a settable connectivity flag and storage estimate, a recording error
//! reporter, and a local store whose writes can be made to fail per table.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use meetcache_store::{
    IndexPosition, IndexValue, LocalStore, MemoryStore, StorageError, StorageResult, Table,
};
use meetcache_sync::{
    Clock, ErrorReporter, HostEnvironment, RemoteStore, StorageEstimate, SyncConfig,
    SyncContext, SyncError, SyncQueueItem, SyncResult,
};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Monday 2 March 2026, 09:00 UTC.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

// ── Clock ───────────────────────────────────────────────────────

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ── Remote ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Insert(Table, Value),
    Upsert(Table, Value),
    Fetch(Table, String, i64),
    Patch(Table, String, Value),
    Delete(Table, String),
}

/// In-memory remote. Rows live in `rows`; failures are scripted with
/// [`MockRemote::fail_times`] or [`MockRemote::fail_forever`].
#[derive(Default)]
pub struct MockRemote {
    calls: Mutex<Vec<RemoteCall>>,
    rows: Mutex<HashMap<(Table, String), Value>>,
    failures_left: AtomicU32,
    fail_forever: AtomicBool,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a row on the server side.
    pub fn seed(&self, table: Table, row: Value) {
        let key = table.key_of(&row).unwrap();
        self.rows.lock().unwrap().insert((table, key), row);
    }

    pub fn row(&self, table: Table, key: &str) -> Option<Value> {
        self.rows
            .lock()
            .unwrap()
            .get(&(table, key.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that wrote something (everything but fetches).
    pub fn writes(&self) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, RemoteCall::Fetch(..)))
            .collect()
    }

    pub fn fail_times(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn fail_forever(&self, on: bool) {
        self.fail_forever.store(on, Ordering::SeqCst);
    }

    fn record(&self, call: RemoteCall) -> SyncResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail_forever.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("connection refused".into()));
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(SyncError::Transport("connection reset".into()));
        }
        Ok(())
    }

    /// What the server sends back: the stored row plus a server-only field.
    fn store_row(&self, table: Table, payload: &Value) -> Value {
        let mut row = payload.clone();
        row["server_seen"] = json!(true);
        let key = table.key_of(&row).unwrap();
        self.rows.lock().unwrap().insert((table, key), row.clone());
        row
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn insert(&self, table: Table, payload: &Value) -> SyncResult<Value> {
        self.record(RemoteCall::Insert(table, payload.clone()))?;
        Ok(self.store_row(table, payload))
    }

    async fn upsert_by_key(&self, table: Table, payload: &Value) -> SyncResult<Value> {
        self.record(RemoteCall::Upsert(table, payload.clone()))?;
        Ok(self.store_row(table, payload))
    }

    async fn fetch_by_key_and_version(
        &self,
        table: Table,
        id: &str,
        lower_version: i64,
    ) -> SyncResult<Option<Value>> {
        self.record(RemoteCall::Fetch(table, id.to_string(), lower_version))?;
        Ok(self
            .row(table, id)
            .filter(|row| row["version"].as_i64().unwrap_or(0) > lower_version))
    }

    async fn patch(&self, table: Table, id: &str, payload: &Value) -> SyncResult<()> {
        self.record(RemoteCall::Patch(table, id.to_string(), payload.clone()))?;
        Ok(())
    }

    async fn delete(&self, table: Table, id: &str) -> SyncResult<()> {
        self.record(RemoteCall::Delete(table, id.to_string()))?;
        self.rows.lock().unwrap().remove(&(table, id.to_string()));
        Ok(())
    }
}

// ── Host environment ────────────────────────────────────────────

pub struct MockEnvironment {
    online: AtomicBool,
    estimate: Mutex<StorageEstimate>,
    fail_estimate: AtomicBool,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            estimate: Mutex::new(StorageEstimate {
                usage: 0,
                quota: 1_000,
            }),
            fail_estimate: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Sets usage so that `usage / quota == ratio` with a 1000-byte quota.
    pub fn set_ratio(&self, ratio: f64) {
        *self.estimate.lock().unwrap() = StorageEstimate {
            usage: (ratio * 1_000.0).round() as u64,
            quota: 1_000,
        };
    }

    pub fn set_estimate(&self, usage: u64, quota: u64) {
        *self.estimate.lock().unwrap() = StorageEstimate { usage, quota };
    }

    pub fn fail_estimate(&self, on: bool) {
        self.fail_estimate.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl HostEnvironment for MockEnvironment {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn storage_estimate(&self) -> SyncResult<StorageEstimate> {
        if self.fail_estimate.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("storage estimate unavailable".into()));
        }
        Ok(*self.estimate.lock().unwrap())
    }
}

// ── Error reporter ──────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(Option<u64>, String)>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<(Option<u64>, String)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, item: &SyncQueueItem, error: &SyncError) {
        self.reports
            .lock()
            .unwrap()
            .push((item.id, error.to_string()));
    }
}

// ── Local store ─────────────────────────────────────────────────

/// Wraps a [`MemoryStore`] and fails `put` and `delete` on the tables passed
/// to [`FlakyStore::fail_writes`]. Reads always go through.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing: Mutex<HashSet<Table>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_writes(&self, table: Table) {
        self.failing.lock().unwrap().insert(table);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, table: Table) -> StorageResult<()> {
        if self.failing.lock().unwrap().contains(&table) {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "disk full writing {table}"
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FlakyStore {
    async fn get(&self, table: Table, key: &str) -> StorageResult<Option<Value>> {
        self.inner.get(table, key).await
    }

    async fn put(&self, table: Table, record: Value) -> StorageResult<String> {
        self.check(table)?;
        self.inner.put(table, record).await
    }

    async fn get_all(&self, table: Table) -> StorageResult<Vec<Value>> {
        self.inner.get_all(table).await
    }

    async fn delete(&self, table: Table, key: &str) -> StorageResult<()> {
        self.check(table)?;
        self.inner.delete(table, key).await
    }

    async fn count(&self, table: Table) -> StorageResult<usize> {
        self.inner.count(table).await
    }

    async fn seek_index(
        &self,
        table: Table,
        index: &str,
        after: Option<&IndexPosition>,
        upper: Bound<&IndexValue>,
    ) -> StorageResult<Option<(IndexPosition, Value)>> {
        self.inner.seek_index(table, index, after, upper).await
    }
}

// ── Harness ─────────────────────────────────────────────────────

pub struct Harness {
    pub store: Arc<MemoryStore>,
    /// The store the sync context writes through; wraps `store`.
    pub faults: Arc<FlakyStore>,
    pub remote: Arc<MockRemote>,
    pub env: Arc<MockEnvironment>,
    pub clock: Arc<ManualClock>,
    pub reporter: Arc<RecordingReporter>,
    pub ctx: SyncContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    pub fn with_store(store: Arc<MemoryStore>, config: SyncConfig) -> Self {
        init_tracing();
        let remote = Arc::new(MockRemote::new());
        let env = Arc::new(MockEnvironment::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let reporter = Arc::new(RecordingReporter::default());
        let faults = Arc::new(FlakyStore::new(store.clone()));
        let ctx = SyncContext::new(faults.clone(), remote.clone(), env.clone())
            .with_clock(clock.clone())
            .with_reporter(reporter.clone())
            .with_config(config);
        Self {
            store,
            faults,
            remote,
            env,
            clock,
            reporter,
            ctx,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn local(&self) -> &dyn LocalStore {
        self.store.as_ref()
    }
}
