//! In-memory [`RecordStore`].
//!
//! Behaves like the directory store (sorted listing, key cursors, decimal
//! generation counters) without touching disk. Embedders and tests use it
//! directly; [`MemoryStore::external_update`] stands in for another writer.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::store::{ListRequest, RecordPage, RecordStore};
use crate::types::{RecordKey, ResourceVersion, StatusSnapshot, WatchRecord, WatchStatus};

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<RecordKey, WatchRecord>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Cap every page at `page_size`, whatever the request asks for.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Insert or replace a record, assigning it the next resource version.
    pub fn insert(&self, mut record: WatchRecord) -> ResourceVersion {
        let key = record.key();
        let mut records = self.lock();
        let previous = records.get(&key).map(|r| r.metadata.resource_version.clone());
        let version = next_version(previous.as_ref());
        record.metadata.resource_version = version.clone();
        records.insert(key, record);
        version
    }

    pub fn get(&self, key: &RecordKey) -> Option<WatchRecord> {
        self.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &RecordKey) -> Option<WatchRecord> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Unconditionally replace a record's status, bumping its version, as a
    /// concurrent writer would.
    pub fn external_update(
        &self,
        key: &RecordKey,
        status: WatchStatus,
    ) -> Result<ResourceVersion, StoreError> {
        let mut records = self.lock();
        let record = records.get_mut(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        let version = next_version(Some(&record.metadata.resource_version));
        record.status = status;
        record.metadata.resource_version = version.clone();
        Ok(version)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RecordKey, WatchRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for MemoryStore {
    fn list(&self, request: &ListRequest) -> Result<RecordPage, StoreError> {
        let limit = request
            .limit
            .unwrap_or(self.page_size)
            .clamp(1, self.page_size);
        let lower = match &request.continue_token {
            Some(token) => Bound::Excluded(token.parse::<RecordKey>()?),
            None => Bound::Unbounded,
        };

        let records = self.lock();
        let mut matching = records
            .range((lower, Bound::Unbounded))
            .filter(|(key, _)| {
                request
                    .namespace
                    .as_ref()
                    .map_or(true, |ns| &key.namespace == ns)
            })
            .map(|(_, record)| record);

        let items: Vec<WatchRecord> = matching.by_ref().take(limit).cloned().collect();
        let continue_token = match (items.last(), matching.next()) {
            (Some(last), Some(_)) => Some(last.key().to_string()),
            _ => None,
        };
        Ok(RecordPage {
            items,
            continue_token,
        })
    }

    fn get_status(&self, key: &RecordKey) -> Result<StatusSnapshot, StoreError> {
        let records = self.lock();
        let record = records.get(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        Ok(StatusSnapshot {
            status: record.status.clone(),
            resource_version: record.metadata.resource_version.clone(),
        })
    }

    fn update_status(
        &self,
        key: &RecordKey,
        expected: &ResourceVersion,
        status: &WatchStatus,
    ) -> Result<ResourceVersion, StoreError> {
        let mut records = self.lock();
        let record = records.get_mut(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        if &record.metadata.resource_version != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected.clone(),
                current: record.metadata.resource_version.clone(),
            });
        }
        let version = next_version(Some(expected));
        record.status = status.clone();
        record.metadata.resource_version = version.clone();
        Ok(version)
    }
}

/// Decimal generation counter; anything unparsable restarts from 1.
pub(crate) fn next_version(current: Option<&ResourceVersion>) -> ResourceVersion {
    let generation = current
        .and_then(|v| v.0.parse::<u64>().ok())
        .unwrap_or(0);
    ResourceVersion(generation.saturating_add(1).to_string())
}
