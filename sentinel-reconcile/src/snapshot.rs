//! Filesystem snapshotter.
//!
//! [`scan`] stats every object under a watch root (never reads content) and
//! returns a path-sorted, deduplicated [`Snapshot`]. Only failures on the
//! root itself fail the scan; a child that vanishes or cannot be stat'ed
//! mid-walk is skipped and counted in [`Snapshot::soft_errors`].
//!
//! Hard links appear once per path and share `(device, inode)`; that
//! collision is expected and left as-is.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use sentinel_core::FileEntry;

use crate::error::{root_err, ScanError};

/// Immutable point-in-time listing of one watch root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub root: PathBuf,
    pub recursive: bool,
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<FileEntry>,
    pub soft_errors: usize,
}

/// Scan `root`. A directory root contributes its children (all descendants
/// when `recursive`); a file root contributes exactly itself.
pub fn scan(root: &Path, recursive: bool) -> Result<Snapshot, ScanError> {
    scan_cancellable(root, recursive, &AtomicBool::new(false))
}

/// [`scan`] that gives up with [`ScanError::Cancelled`] once `cancel` is set.
/// The flag is checked between entries.
pub fn scan_cancellable(
    root: &Path,
    recursive: bool,
    cancel: &AtomicBool,
) -> Result<Snapshot, ScanError> {
    if !root.is_absolute() {
        return Err(ScanError::InvalidRoot {
            path: root.to_path_buf(),
        });
    }

    let root_meta = std::fs::metadata(root).map_err(|e| root_err(root, e))?;
    let taken_at = Utc::now();

    if !root_meta.is_dir() {
        return Ok(Snapshot {
            root: root.to_path_buf(),
            recursive,
            taken_at,
            entries: vec![file_entry(root, &root_meta)],
            soft_errors: 0,
        });
    }

    // walkdir reports an unreadable root as an ordinary item error; surface it
    // as a root failure instead.
    std::fs::read_dir(root).map_err(|e| root_err(root, e))?;

    let mut walker = WalkDir::new(root).min_depth(1).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut entries = Vec::new();
    let mut soft_errors = 0usize;
    for item in walker {
        if cancel.load(Ordering::Relaxed) {
            return Err(ScanError::Cancelled {
                path: root.to_path_buf(),
            });
        }
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                soft_errors += 1;
                tracing::debug!(root = %root.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        match item.metadata() {
            Ok(meta) => entries.push(file_entry(item.path(), &meta)),
            Err(err) => {
                soft_errors += 1;
                tracing::debug!(path = %item.path().display(), error = %err, "stat failed");
            }
        }
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries.dedup_by(|a, b| a.path == b.path);

    Ok(Snapshot {
        root: root.to_path_buf(),
        recursive,
        taken_at,
        entries,
        soft_errors,
    })
}

/// [`scan`] on the blocking pool, bounded by `limit`.
///
/// On timeout the walk is cancelled and awaited before returning, so no
/// blocking scan outlives the call.
pub async fn scan_with_timeout(
    root: PathBuf,
    recursive: bool,
    limit: Duration,
) -> Result<Snapshot, ScanError> {
    let cancel = Arc::new(AtomicBool::new(false));
    let path = root.clone();
    let flag = Arc::clone(&cancel);
    let mut task =
        tokio::task::spawn_blocking(move || scan_cancellable(&path, recursive, &flag));

    let finished = tokio::time::timeout(limit, &mut task).await;
    match finished {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ScanError::Join(join.to_string())),
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            tracing::warn!(
                root = %root.display(),
                after_ms = limit.as_millis() as u64,
                "scan timed out, stopping walk"
            );
            let _ = task.await;
            Err(ScanError::TimedOut {
                path: root,
                after: limit,
            })
        }
    }
}

fn file_entry(path: &Path, meta: &Metadata) -> FileEntry {
    let (device, inode) = device_and_inode(meta);
    FileEntry {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        path: path.to_path_buf(),
        device,
        inode,
        size: meta.len(),
        mod_time: meta.modified().map(DateTime::<Utc>::from).unwrap_or_default(),
        is_dir: meta.is_dir(),
    }
}

#[cfg(unix)]
fn device_and_inode(meta: &Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn device_and_inode(_meta: &Metadata) -> (u64, u64) {
    (0, 0)
}
