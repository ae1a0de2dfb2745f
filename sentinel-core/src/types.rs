//! Domain types for watch records.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Records serialize in the same envelope the cluster resource used
//! (`apiVersion` / `kind` / `metadata` / `spec` / `status`, camelCase fields).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const API_VERSION: &str = "sentinel.io/v1";
pub const KIND: &str = "FileMonitor";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Namespace half of a record identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace(pub String);

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Namespace {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Namespace {
    /// Must be usable as a single path component.
    pub fn validate(&self) -> Result<(), StoreError> {
        if is_valid_segment(&self.0) {
            return Ok(());
        }
        Err(StoreError::Malformed {
            key: self.0.clone(),
            reason: format!("invalid namespace '{}'", self.0),
        })
    }
}

/// Name half of a record identity, unique within its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordName(pub String);

impl fmt::Display for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RecordName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque optimistic-concurrency token handed out by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourceVersion(pub String);

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ResourceVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Namespace-qualified record identity. Ordered by namespace, then name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub namespace: Namespace,
    pub name: RecordName,
}

impl RecordKey {
    pub fn new(namespace: impl Into<Namespace>, name: impl Into<RecordName>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Both halves must be usable as a single path component.
    pub fn validate(&self) -> Result<(), StoreError> {
        for part in [&self.namespace.0, &self.name.0] {
            if !is_valid_segment(part) {
                return Err(StoreError::Malformed {
                    key: self.to_string(),
                    reason: format!("invalid identity segment '{part}'"),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for RecordKey {
    type Err = StoreError;

    /// Parses `namespace/name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((namespace, name)) = s.split_once('/') else {
            return Err(StoreError::Malformed {
                key: s.to_string(),
                reason: "expected <namespace>/<name>".to_string(),
            });
        };
        let key = RecordKey::new(namespace, name);
        key.validate()?;
        Ok(key)
    }
}

fn is_valid_segment(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part.contains(['/', '\\', '\0'])
}

// ---------------------------------------------------------------------------
// File metadata
// ---------------------------------------------------------------------------

/// Metadata for one filesystem object observed under a watched root.
///
/// `(device, inode)` is unique within a snapshot except for hard links, which
/// legitimately share both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub device: u64,
    pub inode: u64,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
}

impl FileEntry {
    /// True when any observed attribute differs. Path and name are the key and
    /// are not compared.
    pub fn differs_from(&self, other: &FileEntry) -> bool {
        self.size != other.size
            || self.mod_time != other.mod_time
            || self.inode != other.inode
            || self.device != other.device
            || self.is_dir != other.is_dir
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub namespace: Namespace,
    pub name: RecordName,
    #[serde(default)]
    pub resource_version: ResourceVersion,
}

/// Desired state: which path to observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub recursive: bool,
}

/// Observed state written back by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatus {
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A declarative watch record as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRecord {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: RecordMeta,
    pub spec: WatchSpec,
    #[serde(default)]
    pub status: WatchStatus,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

impl WatchRecord {
    pub fn new(key: RecordKey, spec: WatchSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: RecordMeta {
                namespace: key.namespace,
                name: key.name,
                resource_version: ResourceVersion::default(),
            },
            spec,
            status: WatchStatus::default(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    pub fn resource_version(&self) -> &ResourceVersion {
        &self.metadata.resource_version
    }
}

/// Result of `get_status`: the current status and the token guarding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: WatchStatus,
    pub resource_version: ResourceVersion,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
