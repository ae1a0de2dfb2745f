//! YAML directory-backed record store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.sentinel/
//!   records/
//!     <namespace>/            (mode 0700)
//!       <name>.yaml           (one file per record, mode 0600)
//! ```
//!
//! Every write goes through a `.yaml.tmp` sibling and a rename, so a reader
//! never observes a half-written record. Conditional status updates are
//! serialized by an in-process lock; two controller processes sharing one
//! directory are not coordinated.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{io_err, StoreError};
use crate::memory::next_version;
use crate::store::{ListRequest, RecordPage, RecordStore};
use crate::types::{
    Namespace, RecordKey, RecordName, ResourceVersion, StatusSnapshot, WatchRecord, WatchSpec,
    WatchStatus,
};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Result of [`DirectoryStore::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    Created(WatchRecord),
    Updated(WatchRecord),
    Unchanged(WatchRecord),
}

impl ApplyResult {
    pub fn record(&self) -> &WatchRecord {
        match self {
            ApplyResult::Created(r) | ApplyResult::Updated(r) | ApplyResult::Unchanged(r) => r,
        }
    }
}

#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.sentinel/records`: pure, no I/O.
pub fn default_root_at(home: &Path) -> PathBuf {
    home.join(".sentinel").join("records")
}

/// `<root>/<namespace>/<name>.yaml`: pure, no I/O.
pub fn record_path_at(root: &Path, key: &RecordKey) -> PathBuf {
    root.join(&key.namespace.0)
        .join(format!("{}.yaml", key.name.0))
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<namespace>/`, created with mode `0700` if absent.
    fn namespace_dir(&self, namespace: &Namespace) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(&namespace.0);
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            set_dir_permissions(&dir)?;
        }
        Ok(dir)
    }

    // -----------------------------------------------------------------------
    // 2. Load
    // -----------------------------------------------------------------------

    /// Load a single record. `NotFound` if the file is absent.
    pub fn get(&self, key: &RecordKey) -> Result<WatchRecord, StoreError> {
        key.validate()?;
        let path = record_path_at(&self.root, key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(io_err(&path, err)),
        };
        let record: WatchRecord =
            serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
                path: path.clone(),
                source: e,
            })?;
        if &record.key() != key {
            return Err(StoreError::Malformed {
                key: key.to_string(),
                reason: format!("file {} declares {}", path.display(), record.key()),
            });
        }
        Ok(record)
    }

    /// All record keys on disk, sorted by namespace then name.
    fn keys(&self, namespace: Option<&Namespace>) -> Result<Vec<RecordKey>, StoreError> {
        if let Some(ns) = namespace {
            ns.validate()?;
        }
        if !self.root.exists() {
            return Ok(vec![]);
        }
        let namespaces = match namespace {
            Some(ns) => vec![ns.clone()],
            None => sorted_dir_names(&self.root)?
                .into_iter()
                .map(Namespace::from)
                .collect(),
        };

        let mut keys = Vec::new();
        for ns in namespaces {
            let dir = self.root.join(&ns.0);
            if !dir.is_dir() {
                continue;
            }
            let mut entries: Vec<_> = std::fs::read_dir(&dir)
                .map_err(|e| io_err(&dir, e))?
                .filter_map(|e| e.ok())
                .collect();
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let fname = entry.file_name();
                let fname = fname.to_string_lossy();
                let Some(name) = fname.strip_suffix(".yaml") else {
                    continue;
                };
                keys.push(RecordKey::new(ns.clone(), RecordName::from(name)));
            }
        }
        keys.sort();
        Ok(keys)
    }

    // -----------------------------------------------------------------------
    // 3. Save (atomic)
    // -----------------------------------------------------------------------

    /// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
    fn save(&self, record: &WatchRecord) -> Result<(), StoreError> {
        let key = record.key();
        self.namespace_dir(&key.namespace)?;
        let path = record_path_at(&self.root, &key);
        let tmp_path = path.with_file_name(format!("{}.yaml.tmp", key.name.0));

        let yaml = serde_yaml::to_string(record)?;
        std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
        set_file_permissions(&tmp_path)?;
        if let Err(err) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(io_err(&path, err));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 4. Record management
    // -----------------------------------------------------------------------

    /// Create a record, or update its spec in place. Status is preserved and
    /// the resource version only moves when something changed.
    pub fn apply(&self, key: &RecordKey, spec: WatchSpec) -> Result<ApplyResult, StoreError> {
        key.validate()?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.get(key) {
            Ok(mut existing) => {
                if existing.spec == spec {
                    return Ok(ApplyResult::Unchanged(existing));
                }
                existing.spec = spec;
                existing.metadata.resource_version =
                    next_version(Some(&existing.metadata.resource_version));
                self.save(&existing)?;
                Ok(ApplyResult::Updated(existing))
            }
            Err(StoreError::NotFound { .. }) => {
                let mut record = WatchRecord::new(key.clone(), spec);
                record.metadata.resource_version = next_version(None);
                self.save(&record)?;
                Ok(ApplyResult::Created(record))
            }
            Err(err) => Err(err),
        }
    }

    pub fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        key.validate()?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = record_path_at(&self.root, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(io_err(&path, err)),
        }
    }
}

impl RecordStore for DirectoryStore {
    fn list(&self, request: &ListRequest) -> Result<RecordPage, StoreError> {
        let limit = request.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let cursor = request
            .continue_token
            .as_deref()
            .map(str::parse::<RecordKey>)
            .transpose()?;

        let keys = self.keys(request.namespace.as_ref())?;
        let mut remaining = keys
            .into_iter()
            .filter(|key| cursor.as_ref().map_or(true, |c| key > c));

        let mut items = Vec::new();
        let mut last_key = None;
        for key in remaining.by_ref() {
            last_key = Some(key.clone());
            match self.get(&key) {
                Ok(record) => items.push(record),
                // Deleted between the directory read and the file read.
                Err(StoreError::NotFound { .. }) => {}
                Err(err @ (StoreError::Parse { .. } | StoreError::Malformed { .. })) => {
                    tracing::warn!(record = %key, error = %err, "skipping unreadable record");
                }
                Err(err) => return Err(err),
            }
            if items.len() == limit {
                break;
            }
        }

        let continue_token = match (last_key, remaining.next()) {
            (Some(last), Some(_)) => Some(last.to_string()),
            _ => None,
        };
        Ok(RecordPage {
            items,
            continue_token,
        })
    }

    fn get_status(&self, key: &RecordKey) -> Result<StatusSnapshot, StoreError> {
        let record = self.get(key)?;
        Ok(StatusSnapshot {
            status: record.status,
            resource_version: record.metadata.resource_version,
        })
    }

    fn update_status(
        &self,
        key: &RecordKey,
        expected: &ResourceVersion,
        status: &WatchStatus,
    ) -> Result<ResourceVersion, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self.get(key)?;
        if &record.metadata.resource_version != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected.clone(),
                current: record.metadata.resource_version,
            });
        }
        let version = next_version(Some(expected));
        record.status = status.clone();
        record.metadata.resource_version = version.clone();
        self.save(&record)?;
        Ok(version)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn sorted_dir_names(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
