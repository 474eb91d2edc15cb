//! Background scheduler for sync passes and daily maintenance.
//!
//! Main loop that coordinates:
//! - Periodic sync passes
//! - Periodic maintenance (quota check, purges, queue cleanup)
//! - Commands from the host (sync now, maintenance now, stop)
//!
//! Passes never overlap: commands are only read between passes.

use crate::context::SyncContext;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::quota::{MaintenanceReport, QuotaManager};
use crate::types::SyncPassReport;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Commands accepted by the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    SyncNow,
    RunMaintenance,
    Stop,
}

/// What the scheduler reports back to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    PassCompleted(SyncPassReport),
    PassFailed(String),
    MaintenanceCompleted(MaintenanceReport),
    MaintenanceFailed(String),
}

pub struct SyncScheduler {
    engine: SyncEngine,
    quota: QuotaManager,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    sync_interval: Duration,
    maintenance_interval: Duration,
}

/// Handle for sending commands to the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn sync_now(&self) -> SyncResult<()> {
        self.send(SchedulerCommand::SyncNow).await
    }

    pub async fn run_maintenance(&self) -> SyncResult<()> {
        self.send(SchedulerCommand::RunMaintenance).await
    }

    pub async fn stop(&self) -> SyncResult<()> {
        self.send(SchedulerCommand::Stop).await
    }

    async fn send(&self, cmd: SchedulerCommand) -> SyncResult<()> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| SyncError::SchedulerStopped)
    }
}

/// Creates a scheduler, its command handle, and the receiving end of its
/// event stream. Fails if the configuration does not validate.
pub fn create_sync_scheduler(
    ctx: SyncContext,
) -> SyncResult<(SchedulerHandle, mpsc::Receiver<SchedulerEvent>, SyncScheduler)> {
    ctx.config.validate()?;
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);

    let scheduler = SyncScheduler {
        sync_interval: Duration::from_secs(ctx.config.sync_interval_secs),
        maintenance_interval: Duration::from_secs(ctx.config.maintenance_interval_secs),
        engine: SyncEngine::new(ctx.clone()),
        quota: QuotaManager::new(ctx),
        command_rx,
        event_tx,
    };

    Ok((SchedulerHandle { command_tx }, event_rx, scheduler))
}

impl SyncScheduler {
    /// Runs the scheduler loop until stopped or every handle is dropped.
    pub async fn run(mut self) {
        info!(
            "sync scheduler started (sync every {:?}, maintenance every {:?})",
            self.sync_interval, self.maintenance_interval
        );

        let mut sync_interval = tokio::time::interval(self.sync_interval);
        let mut maintenance_interval = tokio::time::interval(self.maintenance_interval);

        // Skip first immediate tick
        sync_interval.tick().await;
        maintenance_interval.tick().await;

        loop {
            tokio::select! {
                _ = sync_interval.tick() => self.sync_pass().await,
                _ = maintenance_interval.tick() => self.maintenance().await,
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::SyncNow) => self.sync_pass().await,
                        Some(SchedulerCommand::RunMaintenance) => self.maintenance().await,
                        Some(SchedulerCommand::Stop) => {
                            info!("sync scheduler stopping");
                            break;
                        }
                        None => {
                            info!("command channel closed, stopping sync scheduler");
                            break;
                        }
                    }
                }
            }
        }

        info!("sync scheduler stopped");
    }

    async fn sync_pass(&self) {
        let event = match self.engine.process_offline_sync_queue().await {
            Ok(report) => SchedulerEvent::PassCompleted(report),
            Err(e) => {
                error!("sync pass failed: {e}");
                SchedulerEvent::PassFailed(e.to_string())
            }
        };
        self.emit(event);
    }

    async fn maintenance(&self) {
        let event = match self.quota.run_maintenance().await {
            Ok(report) => SchedulerEvent::MaintenanceCompleted(report),
            Err(e) => {
                warn!("maintenance failed: {e}");
                SchedulerEvent::MaintenanceFailed(e.to_string())
            }
        };
        self.emit(event);
    }

    /// Events are advisory; a full or closed channel drops them.
    fn emit(&self, event: SchedulerEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!("scheduler event dropped: {e}");
        }
    }
}
