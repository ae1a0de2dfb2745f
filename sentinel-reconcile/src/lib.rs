//! Sentinel reconcile: the per-record reconciliation pipeline.
//!
//! Stages:
//! 1. [`snapshot`]: stat the watched root into a sorted [`Snapshot`]
//! 2. [`diff`]: compare it with the recorded status into a [`ChangeSet`]
//! 3. [`writeback`]: conditional status write through [`WriteBackCoordinator`]
//!
//! [`worker::RecordWorker`] drives the three stages for one record, retrying
//! conflicts and transient store failures under a [`BackoffPolicy`].

pub mod backoff;
pub mod diff;
pub mod error;
pub mod snapshot;
pub mod worker;
pub mod writeback;

pub use backoff::BackoffPolicy;
pub use diff::{diff, diff_entries, ChangeSet, ChangeSummary, EntryUpdate};
pub use error::{FailureKind, ScanError, ScanErrorKind, WriteBackError};
pub use snapshot::{scan, scan_cancellable, scan_with_timeout, Snapshot};
pub use worker::{
    shutdown_signalled, Outcome, Plan, ReconcileReport, RecordWorker, WorkerSettings,
};
pub use writeback::WriteBackCoordinator;
