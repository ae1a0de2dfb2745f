//! Status differ: previously recorded entries vs. a fresh [`Snapshot`].
//!
//! Keyed by path, so collection order never matters. Pure and deterministic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use sentinel_core::FileEntry;

use crate::snapshot::Snapshot;

/// One entry whose observed attributes changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdate {
    pub old: FileEntry,
    pub new: FileEntry,
}

/// Minimal difference between two entry sets, each list sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<FileEntry>,
    pub removed: Vec<PathBuf>,
    pub updated: Vec<EntryUpdate>,
}

/// Counts only, for logs and reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.updated.len()
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            added: self.added.len(),
            removed: self.removed.len(),
            updated: self.updated.len(),
        }
    }

    /// `previous ∪ added \ removed`, with updates replacing their entries.
    /// Output is sorted by path.
    pub fn apply(&self, previous: &[FileEntry]) -> Vec<FileEntry> {
        let mut merged: BTreeMap<&Path, &FileEntry> =
            previous.iter().map(|e| (e.path.as_path(), e)).collect();
        for path in &self.removed {
            merged.remove(path.as_path());
        }
        for update in &self.updated {
            merged.insert(update.new.path.as_path(), &update.new);
        }
        for entry in &self.added {
            merged.insert(entry.path.as_path(), entry);
        }
        merged.into_values().cloned().collect()
    }
}

/// Compare `previous` against `current`.
///
/// Any difference in size, mtime, inode, device, or directory flag is an
/// update, even when the other fields match.
pub fn diff(previous: &[FileEntry], current: &Snapshot) -> ChangeSet {
    diff_entries(previous, &current.entries)
}

pub fn diff_entries(previous: &[FileEntry], current: &[FileEntry]) -> ChangeSet {
    let before: BTreeMap<&Path, &FileEntry> =
        previous.iter().map(|e| (e.path.as_path(), e)).collect();
    let after: BTreeMap<&Path, &FileEntry> =
        current.iter().map(|e| (e.path.as_path(), e)).collect();

    let mut changes = ChangeSet::default();
    for (path, new) in &after {
        match before.get(path) {
            None => changes.added.push((*new).clone()),
            Some(old) if old.differs_from(new) => changes.updated.push(EntryUpdate {
                old: (*old).clone(),
                new: (*new).clone(),
            }),
            Some(_) => {}
        }
    }
    for path in before.keys() {
        if !after.contains_key(path) {
            changes.removed.push(path.to_path_buf());
        }
    }
    changes
}
