//! Scheduler/dispatcher: enumerate records, dispatch due ones, reap reports.
//!
//! A single control loop owns enumeration, dispatch, and the deferral table.
//! Workers run in a [`JoinSet`]; each waits for a pool permit inside its own
//! task, so dispatch never blocks on a running reconcile. The in-flight set
//! keeps at most one worker per record.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use sentinel_core::{enumerate, Namespace, RecordKey, RecordStore, WatchRecord};
use sentinel_reconcile::{
    shutdown_signalled, BackoffPolicy, FailureKind, Outcome, ReconcileReport, RecordWorker,
    ScanErrorKind, WriteBackCoordinator,
};

use crate::config::ControllerConfig;
use crate::error::DaemonError;
use crate::inflight::{InFlightGuard, InFlightSet};
use crate::stats::{ControllerStats, CycleStats};

/// A record whose last attempt failed transiently, waiting for `not_before`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileTask {
    pub key: RecordKey,
    pub attempt: u32,
    pub not_before: Instant,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub namespace: Option<Namespace>,
    pub page_size: usize,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub store_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Spacing for deferred records; the worker's own retry policy.
    pub backoff: BackoffPolicy,
}

impl SchedulerSettings {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            namespace: config.namespace_filter(),
            page_size: config.page_size,
            concurrency: config.concurrency,
            poll_interval: config.poll_interval(),
            store_timeout: config.store_timeout(),
            shutdown_grace: config.shutdown_grace(),
            backoff: config.backoff,
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn RecordStore>,
    worker: RecordWorker,
    settings: SchedulerSettings,
    in_flight: InFlightSet,
    permits: Arc<Semaphore>,
    deferred: HashMap<RecordKey, ReconcileTask>,
    tasks: JoinSet<Option<ReconcileReport>>,
    stats: Arc<ControllerStats>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn RecordStore>, config: &ControllerConfig) -> Self {
        let settings = SchedulerSettings::from_config(config);
        let worker = RecordWorker::new(
            WriteBackCoordinator::new(Arc::clone(&store), settings.store_timeout),
            config.worker_settings(),
        );
        Self::with_worker(store, worker, settings)
    }

    pub fn with_worker(
        store: Arc<dyn RecordStore>,
        worker: RecordWorker,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            store,
            worker,
            settings,
            in_flight: InFlightSet::new(),
            deferred: HashMap::new(),
            tasks: JoinSet::new(),
            stats: Arc::new(ControllerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ControllerStats> {
        Arc::clone(&self.stats)
    }

    pub fn in_flight(&self) -> InFlightSet {
        self.in_flight.clone()
    }

    pub fn deferred(&self, key: &RecordKey) -> Option<&ReconcileTask> {
        self.deferred.get(key)
    }

    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Drive cycles at the poll interval until `shutdown` fires, then give
    /// running workers `shutdown_grace` to finish before aborting them.
    pub async fn run(mut self, shutdown: broadcast::Sender<()>) -> Result<(), DaemonError> {
        let mut shutdown_rx = shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            concurrency = self.settings.concurrency,
            namespace = self.settings.namespace.as_ref().map(|ns| ns.0.as_str()).unwrap_or("*"),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    match self.run_cycle(&shutdown).await {
                        Ok(cycle) => tracing::debug!(
                            enumerated = cycle.enumerated,
                            dispatched = cycle.dispatched,
                            skipped_in_flight = cycle.skipped_in_flight,
                            skipped_not_due = cycle.skipped_not_due,
                            "cycle dispatched"
                        ),
                        Err(err) => {
                            self.stats.record_skipped_cycle();
                            tracing::error!(error = %err, "enumeration failed, skipping cycle");
                        }
                    }
                }
                Some(joined) = self.tasks.join_next() => {
                    self.handle_joined(joined);
                }
            }
        }

        self.drain().await;
        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// One cycle followed by waiting for every dispatched worker.
    pub async fn run_once(&mut self) -> Result<(CycleStats, Vec<ReconcileReport>), DaemonError> {
        let (shutdown, _keep) = broadcast::channel(1);
        let cycle = self.run_cycle(&shutdown).await?;
        let mut reports = Vec::with_capacity(cycle.dispatched);
        while let Some(joined) = self.tasks.join_next().await {
            if let Some(report) = self.handle_joined(joined) {
                reports.push(report);
            }
        }
        Ok((cycle, reports))
    }

    /// Enumerate and dispatch. Returns once every due record has been handed
    /// to a task, without waiting for any of them.
    pub async fn run_cycle(
        &mut self,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<CycleStats, DaemonError> {
        let records = self.enumerate().await?;
        let now = Instant::now();

        let present: HashSet<RecordKey> = records.iter().map(WatchRecord::key).collect();
        self.deferred.retain(|key, _| present.contains(key));

        let mut cycle = CycleStats {
            enumerated: records.len(),
            ..CycleStats::default()
        };
        for record in records {
            let key = record.key();
            if matches!(self.deferred.get(&key), Some(task) if task.not_before > now) {
                cycle.skipped_not_due += 1;
                continue;
            }
            let Some(guard) = self.in_flight.try_claim(&key) else {
                tracing::trace!(record = %key, "already in flight");
                cycle.skipped_in_flight += 1;
                continue;
            };
            self.dispatch(record, guard, shutdown.subscribe());
            cycle.dispatched += 1;
        }

        self.stats.record_cycle(&cycle);
        Ok(cycle)
    }

    async fn enumerate(&self) -> Result<Vec<WatchRecord>, DaemonError> {
        let store = Arc::clone(&self.store);
        let namespace = self.settings.namespace.clone();
        let page_size = self.settings.page_size;
        let task = tokio::task::spawn_blocking(move || {
            enumerate(store.as_ref(), namespace.as_ref(), page_size)
        });
        match tokio::time::timeout(self.settings.store_timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(DaemonError::Task {
                task: "enumeration",
                message: join.to_string(),
            }),
            Err(_) => Err(DaemonError::Store(sentinel_core::StoreError::Unavailable(
                format!(
                    "enumeration timed out after {:?}",
                    self.settings.store_timeout
                ),
            ))),
        }
    }

    fn dispatch(
        &mut self,
        record: WatchRecord,
        guard: InFlightGuard,
        shutdown: broadcast::Receiver<()>,
    ) {
        let worker = self.worker.clone();
        let permits = Arc::clone(&self.permits);
        let key = record.key();
        let mut shutdown = shutdown;
        self.tasks.spawn(async move {
            let _guard = guard;
            // Queued tasks that have not reached the pool yet never start once
            // shutdown is requested. The semaphore is never closed.
            let _permit = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown) => {
                    tracing::debug!(record = %key, "shutdown before a worker slot freed up");
                    return None;
                }
                permit = permits.acquire_owned() => permit.ok(),
            };
            Some(worker.reconcile(&record, shutdown).await)
        });
    }

    fn handle_joined(
        &mut self,
        joined: Result<Option<ReconcileReport>, JoinError>,
    ) -> Option<ReconcileReport> {
        match joined {
            Ok(Some(report)) => {
                self.handle_report(&report);
                Some(report)
            }
            Ok(None) => None,
            Err(err) if err.is_cancelled() => None,
            Err(err) => {
                tracing::error!(error = %err, "reconcile task panicked");
                None
            }
        }
    }

    fn handle_report(&mut self, report: &ReconcileReport) {
        let key = &report.key;
        self.stats.record_outcome(&report.outcome);
        if report.soft_errors > 0 {
            tracing::warn!(record = %key, soft_errors = report.soft_errors, "skipped unreadable entries");
        }

        match &report.outcome {
            Outcome::Updated { version } => {
                tracing::info!(
                    record = %key,
                    version = %version,
                    added = report.changes.added,
                    removed = report.changes.removed,
                    updated = report.changes.updated,
                    attempts = report.write_attempts,
                    "status updated"
                );
            }
            Outcome::Unchanged => {
                tracing::debug!(record = %key, "status unchanged");
            }
            Outcome::Failed(FailureKind::Transient) => {
                let attempt = self.deferred.get(key).map_or(0, |t| t.attempt) + 1;
                let delay = self.settings.backoff.delay_for_attempt(attempt);
                tracing::error!(
                    record = %key,
                    kind = %FailureKind::Transient,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = report.error.as_deref().unwrap_or(""),
                    "reconcile deferred"
                );
                self.deferred.insert(
                    key.clone(),
                    ReconcileTask {
                        key: key.clone(),
                        attempt,
                        not_before: Instant::now() + delay,
                    },
                );
                return;
            }
            Outcome::Failed(kind @ (FailureKind::NotFound | FailureKind::Scan(ScanErrorKind::NotFound))) => {
                tracing::warn!(
                    record = %key,
                    kind = %kind,
                    error = report.error.as_deref().unwrap_or(""),
                    "reconcile skipped"
                );
            }
            Outcome::Failed(kind) => {
                tracing::error!(
                    record = %key,
                    kind = %kind,
                    error = report.error.as_deref().unwrap_or(""),
                    "reconcile failed"
                );
            }
        }
        self.deferred.remove(key);
    }

    async fn drain(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        tracing::info!(running = self.tasks.len(), "waiting for in-flight reconciles");
        let deadline = tokio::time::sleep(self.settings.shutdown_grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!(
                        remaining = self.tasks.len(),
                        "shutdown grace elapsed, aborting in-flight reconciles"
                    );
                    self.tasks.abort_all();
                    while let Some(joined) = self.tasks.join_next().await {
                        self.handle_joined(joined);
                    }
                    return;
                }
                joined = self.tasks.join_next() => match joined {
                    Some(joined) => {
                        self.handle_joined(joined);
                    }
                    None => return,
                },
            }
        }
    }
}
