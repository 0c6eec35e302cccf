//! The periodic scan → reconcile → sleep loop.
//!
//! Each cycle rebuilds both manifests from scratch; nothing but an iteration
//! counter survives between cycles. The next cycle starts `interval` after the
//! previous one ended, so a slow cycle delays the next tick instead of
//! overlapping it.

use crate::config::SyncTarget;
use crate::manifest::build_manifest;
use crate::reconcile::{reconcile, ReconcileReport};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Summary of one scan-diff-apply pass
#[derive(Debug)]
pub struct CycleReport {
    pub iteration: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub source_files: usize,
    pub replica_files: usize,
    pub scan_failures: usize,
    pub reconcile: ReconcileReport,
}

impl CycleReport {
    fn log(&self) {
        if self.reconcile.is_noop() && self.scan_failures == 0 {
            debug!(
                iteration = self.iteration,
                started_at = %self.started_at.to_rfc3339(),
                files = self.source_files,
                replica_files = self.replica_files,
                elapsed_ms = self.elapsed.as_millis() as u64,
                "Replica already up to date"
            );
        } else {
            info!(
                iteration = self.iteration,
                started_at = %self.started_at.to_rfc3339(),
                source_files = self.source_files,
                replica_files = self.replica_files,
                copied = self.reconcile.copied(),
                removed = self.reconcile.removed(),
                failed = self.reconcile.failures.len(),
                unreadable = self.scan_failures,
                elapsed_ms = self.elapsed.as_millis() as u64,
                "Sync cycle complete"
            );
        }
    }
}

/// Run one full cycle against `target`, blocking the calling thread.
pub fn run_cycle(target: &SyncTarget, iteration: u64) -> CycleReport {
    let started_at = Utc::now();
    let clock = Instant::now();
    debug!(iteration, "Starting sync cycle");

    let source = build_manifest(target.source());
    let replica = build_manifest(target.replica());
    let reconcile = reconcile(&source, &replica, target.source(), target.replica());

    CycleReport {
        iteration,
        started_at,
        elapsed: clock.elapsed(),
        source_files: source.len(),
        replica_files: replica.len(),
        scan_failures: source.failures().len() + replica.failures().len(),
        reconcile,
    }
}

/// Mirrors one source folder into one replica folder until cancelled.
pub struct SyncService {
    target: SyncTarget,
    iteration: u64,
}

impl SyncService {
    pub fn new(target: SyncTarget) -> Self {
        Self {
            target,
            iteration: 0,
        }
    }

    /// Perform a single cycle synchronously
    pub fn run_cycle(&mut self) -> CycleReport {
        self.iteration += 1;
        let report = run_cycle(&self.target, self.iteration);
        report.log();
        report
    }

    /// Loop until `cancel` fires. Cancellation is observed before each cycle
    /// and during the sleep; a cycle already running is allowed to finish.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            source = %self.target.source().display(),
            replica = %self.target.replica().display(),
            interval_secs = self.target.interval().as_secs(),
            log_file = %self.target.log_file().display(),
            "Sync loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.iteration += 1;
            let target = self.target.clone();
            let iteration = self.iteration;

            match tokio::task::spawn_blocking(move || run_cycle(&target, iteration)).await {
                Ok(report) => report.log(),
                Err(e) => error!(iteration, "Sync cycle aborted: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.target.interval()) => {}
            }
        }

        info!(cycles = self.iteration, "Sync loop stopped");
    }
}
