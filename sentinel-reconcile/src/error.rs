//! Error types for sentinel-reconcile.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use sentinel_core::{StoreError, StoreErrorKind};

/// Why a scan of a watched root failed as a whole.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("watch root must be an absolute path: {path}")]
    InvalidRoot { path: PathBuf },

    #[error("watch root does not exist: {path}")]
    NotFound { path: PathBuf },

    #[error("permission denied reading watch root: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scan of {path} timed out after {after:?}")]
    TimedOut { path: PathBuf, after: Duration },

    /// The walk was stopped through its cancel flag.
    #[error("scan of {path} cancelled")]
    Cancelled { path: PathBuf },

    #[error("scan task failed: {0}")]
    Join(String),
}

/// Coarse scan failure classification carried in [`FailureKind::Scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorKind {
    InvalidRoot,
    NotFound,
    PermissionDenied,
    Io,
    TimedOut,
}

impl ScanError {
    pub fn kind(&self) -> ScanErrorKind {
        match self {
            ScanError::InvalidRoot { .. } => ScanErrorKind::InvalidRoot,
            ScanError::NotFound { .. } => ScanErrorKind::NotFound,
            ScanError::PermissionDenied { .. } => ScanErrorKind::PermissionDenied,
            ScanError::Io { .. } | ScanError::Join(_) => ScanErrorKind::Io,
            ScanError::TimedOut { .. } | ScanError::Cancelled { .. } => ScanErrorKind::TimedOut,
        }
    }
}

/// Root-level I/O failure, mapped onto the scan taxonomy.
pub(crate) fn root_err(path: impl Into<PathBuf>, source: std::io::Error) -> ScanError {
    let path = path.into();
    match source.kind() {
        std::io::ErrorKind::NotFound => ScanError::NotFound { path },
        std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied { path },
        _ => ScanError::Io { path, source },
    }
}

/// A single conditional status write, classified for retry.
#[derive(Debug, Error)]
pub enum WriteBackError {
    /// The resource version moved; refetch and recompute before retrying.
    #[error("status conflict: {0}")]
    Conflict(#[source] StoreError),

    /// Store unavailable or too slow; retry with backoff.
    #[error("transient store failure: {0}")]
    Transient(#[source] StoreError),

    /// The record vanished.
    #[error("record gone: {0}")]
    NotFound(#[source] StoreError),

    /// Retrying cannot help this cycle.
    #[error("permanent store failure: {0}")]
    Permanent(#[source] StoreError),
}

impl From<StoreError> for WriteBackError {
    fn from(err: StoreError) -> Self {
        match err.kind() {
            StoreErrorKind::Conflict => WriteBackError::Conflict(err),
            StoreErrorKind::Unavailable => WriteBackError::Transient(err),
            StoreErrorKind::NotFound => WriteBackError::NotFound(err),
            StoreErrorKind::Permanent => WriteBackError::Permanent(err),
        }
    }
}

/// Why a reconcile attempt ended in `Outcome::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Scanning failed; status was not touched.
    Scan(ScanErrorKind),
    /// The record disappeared from the store mid-attempt.
    NotFound,
    /// Retries exhausted (or shutdown during backoff); deferred to a later cycle.
    Transient,
    /// Abandoned for this cycle.
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Scan(kind) => write!(f, "scan:{}", scan_kind_label(*kind)),
            FailureKind::NotFound => write!(f, "not_found"),
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

fn scan_kind_label(kind: ScanErrorKind) -> &'static str {
    match kind {
        ScanErrorKind::InvalidRoot => "invalid_root",
        ScanErrorKind::NotFound => "not_found",
        ScanErrorKind::PermissionDenied => "permission_denied",
        ScanErrorKind::Io => "io",
        ScanErrorKind::TimedOut => "timed_out",
    }
}
