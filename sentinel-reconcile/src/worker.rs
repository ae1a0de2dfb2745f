//! Record worker: reconciles exactly one watch record per call.
//!
//! ```text
//! Scanning -> Diffing -> Done                      (no change)
//!                     -> WritingBack -> Done       (written)
//!                                    -> WritingBack (conflict: refetch, recompute)
//!                                    -> Retrying -> WritingBack (transient)
//!                                    -> Aborted    (permanent / budget spent)
//! ```
//!
//! The snapshot taken while scanning is authoritative for the whole attempt;
//! conflicts recompute against it without rescanning.

use std::time::Duration;

use tokio::sync::broadcast;

use sentinel_core::{FileEntry, RecordKey, ResourceVersion, WatchRecord, WatchStatus};

use crate::backoff::BackoffPolicy;
use crate::diff::{diff, ChangeSet, ChangeSummary};
use crate::error::{FailureKind, ScanError, ScanErrorKind, WriteBackError};
use crate::snapshot::{scan_with_timeout, Snapshot};
use crate::writeback::WriteBackCoordinator;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub scan_timeout: Duration,
    /// Consecutive conflicts retried immediately before backing off.
    pub max_conflict_retries: u32,
    pub backoff: BackoffPolicy,
    /// Record `lastError` in status when a scan fails (not for NotFound).
    pub publish_scan_errors: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(60),
            max_conflict_retries: 3,
            backoff: BackoffPolicy::default(),
            publish_scan_errors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Updated { version: ResourceVersion },
    Failed(FailureKind),
}

impl Outcome {
    pub fn label(&self) -> String {
        match self {
            Outcome::Unchanged => "unchanged".to_string(),
            Outcome::Updated { .. } => "updated".to_string(),
            Outcome::Failed(kind) => format!("failed:{kind}"),
        }
    }
}

/// What one reconcile attempt did, handed back to the scheduler.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub key: RecordKey,
    pub outcome: Outcome,
    /// Number of `update_status` calls issued.
    pub write_attempts: u32,
    pub changes: ChangeSummary,
    pub soft_errors: usize,
    /// Last error message seen, if the attempt failed.
    pub error: Option<String>,
}

impl ReconcileReport {
    fn new(key: RecordKey) -> Self {
        Self {
            key,
            outcome: Outcome::Unchanged,
            write_attempts: 0,
            changes: ChangeSummary::default(),
            soft_errors: 0,
            error: None,
        }
    }

    fn finish(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    fn fail(mut self, kind: FailureKind, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self.outcome = Outcome::Failed(kind);
        self
    }
}

/// Scan plus diff, without writing.
#[derive(Debug, Clone)]
pub struct Plan {
    pub snapshot: Snapshot,
    pub changes: ChangeSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scanning,
    Diffing,
    WritingBack,
    Retrying,
    Done,
    Aborted,
}

/// Why the retry loop stopped without a successful write.
enum Stop {
    Converged,
    Failed(FailureKind, WriteBackError),
    ShutDown(WriteBackError),
}

#[derive(Clone)]
pub struct RecordWorker {
    coordinator: WriteBackCoordinator,
    settings: WorkerSettings,
}

impl RecordWorker {
    pub fn new(coordinator: WriteBackCoordinator, settings: WorkerSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Scan the record's root and diff it against the recorded status.
    pub async fn plan(&self, record: &WatchRecord) -> Result<Plan, ScanError> {
        let snapshot = scan_with_timeout(
            record.spec.path.clone(),
            record.spec.recursive,
            self.settings.scan_timeout,
        )
        .await?;
        let changes = diff(&record.status.files, &snapshot);
        Ok(Plan { snapshot, changes })
    }

    /// Run one full reconcile attempt. `shutdown` is observed before scanning
    /// and while sleeping between retries; a store call in progress is never
    /// cut short.
    pub async fn reconcile(
        &self,
        record: &WatchRecord,
        mut shutdown: broadcast::Receiver<()>,
    ) -> ReconcileReport {
        let key = record.key();
        let mut report = ReconcileReport::new(key.clone());

        if shutdown_pending(&mut shutdown) {
            tracing::debug!(record = %key, "shutdown requested before scan, not starting");
            return report.fail(FailureKind::Transient, "shutdown requested before scan");
        }

        trace_phase(&key, Phase::Scanning);
        let plan = match self.plan(record).await {
            Ok(plan) => plan,
            Err(err) => {
                let kind = err.kind();
                if self.settings.publish_scan_errors && kind != ScanErrorKind::NotFound {
                    self.publish_scan_error(record, &err).await;
                }
                trace_phase(&key, Phase::Aborted);
                return report.fail(FailureKind::Scan(kind), err);
            }
        };

        trace_phase(&key, Phase::Diffing);
        report.soft_errors = plan.snapshot.soft_errors;
        report.changes = plan.changes.summary();
        if plan.changes.is_empty() {
            trace_phase(&key, Phase::Done);
            return report.finish(Outcome::Unchanged);
        }

        let result = self
            .write_back(
                &key,
                record.resource_version().clone(),
                record.status.files.clone(),
                &plan.snapshot,
                plan.changes,
                &mut report,
                &mut shutdown,
            )
            .await;

        match result {
            Ok(version) => {
                trace_phase(&key, Phase::Done);
                report.finish(Outcome::Updated { version })
            }
            Err(Stop::Converged) => {
                trace_phase(&key, Phase::Done);
                report.finish(Outcome::Unchanged)
            }
            Err(Stop::Failed(kind, err)) => {
                trace_phase(&key, Phase::Aborted);
                report.fail(kind, err)
            }
            Err(Stop::ShutDown(err)) => {
                trace_phase(&key, Phase::Aborted);
                tracing::debug!(record = %key, "shutdown during backoff");
                report.fail(FailureKind::Transient, err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_back(
        &self,
        key: &RecordKey,
        mut version: ResourceVersion,
        mut previous: Vec<FileEntry>,
        snapshot: &Snapshot,
        mut changes: ChangeSet,
        report: &mut ReconcileReport,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<ResourceVersion, Stop> {
        let mut conflicts = 0u32;
        let mut transient = 0u32;
        let mut stale = false;

        loop {
            if stale {
                match self.coordinator.refetch(key).await {
                    Ok(fresh) => {
                        previous = fresh.status.files;
                        version = fresh.resource_version;
                        changes = diff(&previous, snapshot);
                        report.changes = changes.summary();
                        stale = false;
                        if changes.is_empty() {
                            tracing::debug!(record = %key, "status already converged after refetch");
                            return Err(Stop::Converged);
                        }
                    }
                    Err(err @ WriteBackError::NotFound(_)) => {
                        return Err(Stop::Failed(FailureKind::NotFound, err))
                    }
                    Err(err @ WriteBackError::Permanent(_)) => {
                        return Err(Stop::Failed(FailureKind::Permanent, err))
                    }
                    Err(err) => {
                        transient += 1;
                        self.back_off(key, transient, err, shutdown).await?;
                        continue;
                    }
                }
            }

            trace_phase(key, Phase::WritingBack);
            report.write_attempts += 1;
            match self
                .coordinator
                .apply(key, &version, &previous, &changes)
                .await
            {
                Ok(new_version) => return Ok(new_version),
                Err(err @ WriteBackError::Conflict(_)) => {
                    conflicts += 1;
                    stale = true;
                    tracing::debug!(record = %key, attempt = report.write_attempts, conflicts, "version conflict, refetching");
                    if conflicts > self.settings.max_conflict_retries {
                        conflicts = 0;
                        transient += 1;
                        self.back_off(key, transient, err, shutdown).await?;
                    }
                }
                Err(err @ WriteBackError::Transient(_)) => {
                    transient += 1;
                    self.back_off(key, transient, err, shutdown).await?;
                }
                Err(err @ WriteBackError::NotFound(_)) => {
                    return Err(Stop::Failed(FailureKind::NotFound, err))
                }
                Err(err @ WriteBackError::Permanent(_)) => {
                    return Err(Stop::Failed(FailureKind::Permanent, err))
                }
            }
        }
    }

    /// Sleep before retry `attempt`, unless the budget is spent or shutdown
    /// arrives first.
    async fn back_off(
        &self,
        key: &RecordKey,
        attempt: u32,
        err: WriteBackError,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), Stop> {
        let policy = &self.settings.backoff;
        if policy.exhausted(attempt) {
            tracing::debug!(record = %key, attempt, error = %err, "transient retry budget exhausted");
            return Err(Stop::Failed(FailureKind::Transient, err));
        }
        let delay = policy.jittered_delay(attempt);
        trace_phase(key, Phase::Retrying);
        tracing::debug!(record = %key, attempt, delay_ms = delay.as_millis() as u64, error = %err, "backing off");
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = shutdown_signalled(shutdown) => Err(Stop::ShutDown(err)),
        }
    }

    async fn publish_scan_error(&self, record: &WatchRecord, err: &ScanError) {
        let key = record.key();
        let status = WatchStatus {
            last_error: Some(err.to_string()),
            ..record.status.clone()
        };
        if let Err(write_err) = self
            .coordinator
            .update(&key, record.resource_version(), status)
            .await
        {
            tracing::warn!(record = %key, error = %write_err, "could not record scan error in status");
        }
    }
}

/// Resolves on a shutdown message. A closed channel means nobody can ask for
/// shutdown any more, so it never resolves.
pub async fn shutdown_signalled(rx: &mut broadcast::Receiver<()>) {
    if let Err(broadcast::error::RecvError::Closed) = rx.recv().await {
        std::future::pending::<()>().await;
    }
}

fn shutdown_pending(rx: &mut broadcast::Receiver<()>) -> bool {
    matches!(
        rx.try_recv(),
        Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_))
    )
}

fn trace_phase(key: &RecordKey, phase: Phase) {
    tracing::trace!(record = %key, phase = ?phase, "reconcile phase");
}
