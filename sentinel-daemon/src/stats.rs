use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use sentinel_reconcile::Outcome;

/// Counters for one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub enumerated: usize,
    pub dispatched: usize,
    pub skipped_in_flight: usize,
    pub skipped_not_due: usize,
}

/// Lifetime counters shared between the scheduler and the status endpoint.
#[derive(Debug, Default)]
pub struct ControllerStats {
    cycles: AtomicU64,
    skipped_cycles: AtomicU64,
    last_cycle_unix: AtomicU64,
    dispatched: AtomicU64,
    updated: AtomicU64,
    unchanged: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub last_cycle_at_unix: u64,
    pub dispatched: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl ControllerStats {
    pub fn record_cycle(&self, cycle: &CycleStats) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.dispatched
            .fetch_add(cycle.dispatched as u64, Ordering::Relaxed);
        self.last_cycle_unix
            .store(unix_seconds_now(), Ordering::Relaxed);
    }

    pub fn record_skipped_cycle(&self) {
        self.skipped_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Updated { .. } => &self.updated,
            Outcome::Unchanged => &self.unchanged,
            Outcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped_cycles: self.skipped_cycles.load(Ordering::Relaxed),
            last_cycle_at_unix: self.last_cycle_unix.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
