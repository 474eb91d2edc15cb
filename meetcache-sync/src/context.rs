//! The engine context: every collaborator the sync components share.
//!
//! Built once per process and handed to each component, so nothing in this
//! crate keeps module-level state.

use crate::config::SyncConfig;
use crate::environment::{Clock, ErrorReporter, HostEnvironment, SystemClock, TracingErrorReporter};
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use meetcache_store::LocalStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub env: Arc<dyn HostEnvironment>,
    pub clock: Arc<dyn Clock>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub config: SyncConfig,
}

impl SyncContext {
    /// Creates a context with the system clock, tracing error reporter and
    /// default configuration.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        env: Arc<dyn HostEnvironment>,
    ) -> Self {
        Self {
            store,
            remote,
            env,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(TracingErrorReporter),
            config: SyncConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
