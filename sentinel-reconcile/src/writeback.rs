//! Write-back coordinator: conditional status writes against the record store.
//!
//! Each call is a single store round-trip, run on the blocking pool and
//! bounded by the store-call timeout. A timeout is reported as
//! [`WriteBackError::Transient`]; the blocking call itself may still land,
//! in which case the next attempt sees a conflict and refetches.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use sentinel_core::{
    FileEntry, RecordKey, RecordStore, ResourceVersion, StatusSnapshot, StoreError, WatchStatus,
};

use crate::diff::ChangeSet;
use crate::error::WriteBackError;

#[derive(Clone)]
pub struct WriteBackCoordinator {
    store: Arc<dyn RecordStore>,
    call_timeout: Duration,
}

impl WriteBackCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Apply `changes` on top of `previous` and submit the full entry set,
    /// conditioned on `expected`. Returns the new resource version.
    pub async fn apply(
        &self,
        key: &RecordKey,
        expected: &ResourceVersion,
        previous: &[FileEntry],
        changes: &ChangeSet,
    ) -> Result<ResourceVersion, WriteBackError> {
        let status = WatchStatus {
            files: changes.apply(previous),
            last_reconciled: Some(Utc::now()),
            last_error: None,
        };
        self.update(key, expected, status).await
    }

    /// Submit a complete status, conditioned on `expected`.
    pub async fn update(
        &self,
        key: &RecordKey,
        expected: &ResourceVersion,
        status: WatchStatus,
    ) -> Result<ResourceVersion, WriteBackError> {
        let key = key.clone();
        let expected = expected.clone();
        self.call("update_status", move |store| {
            store.update_status(&key, &expected, &status)
        })
        .await
        .map_err(WriteBackError::from)
    }

    /// Current status and version, for recomputing after a conflict.
    pub async fn refetch(&self, key: &RecordKey) -> Result<StatusSnapshot, WriteBackError> {
        let key = key.clone();
        self.call("get_status", move |store| store.get_status(&key))
            .await
            .map_err(WriteBackError::from)
    }

    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || f(store.as_ref()));
        match tokio::time::timeout(self.call_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Unavailable(format!("{op} task failed: {join}"))),
            Err(_) => Err(StoreError::Unavailable(format!(
                "{op} timed out after {:?}",
                self.call_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use sentinel_core::{MemoryStore, WatchRecord, WatchSpec};

    use crate::diff::diff_entries;

    fn entry(name: &str, size: u64) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: PathBuf::from("/data").join(name),
            device: 1,
            inode: size,
            size,
            mod_time: chrono::DateTime::from_timestamp(1_700_000_000, 0).expect("ts"),
            is_dir: false,
        }
    }

    fn seeded() -> (Arc<MemoryStore>, RecordKey, ResourceVersion) {
        let store = Arc::new(MemoryStore::new());
        let key = RecordKey::new("default", "data");
        let version = store.insert(WatchRecord::new(
            key.clone(),
            WatchSpec {
                path: PathBuf::from("/data"),
                recursive: false,
            },
        ));
        (store, key, version)
    }

    struct SlowStore;

    impl RecordStore for SlowStore {
        fn list(
            &self,
            _request: &sentinel_core::ListRequest,
        ) -> Result<sentinel_core::RecordPage, StoreError> {
            Ok(sentinel_core::RecordPage::default())
        }

        fn get_status(&self, key: &RecordKey) -> Result<StatusSnapshot, StoreError> {
            std::thread::sleep(Duration::from_millis(200));
            Err(StoreError::NotFound {
                key: key.to_string(),
            })
        }

        fn update_status(
            &self,
            key: &RecordKey,
            _expected: &ResourceVersion,
            _status: &WatchStatus,
        ) -> Result<ResourceVersion, StoreError> {
            self.get_status(key).map(|s| s.resource_version)
        }
    }

    #[tokio::test]
    async fn apply_writes_merged_entries_and_stamps_time() {
        let (store, key, v1) = seeded();
        let coordinator = WriteBackCoordinator::new(store.clone(), Duration::from_secs(5));

        let changes = diff_entries(&[], &[entry("a.txt", 10), entry("b.txt", 20)]);
        let v2 = coordinator
            .apply(&key, &v1, &[], &changes)
            .await
            .expect("apply");
        assert_ne!(v1, v2);

        let stored = store.get(&key).expect("record");
        assert_eq!(stored.status.files, [entry("a.txt", 10), entry("b.txt", 20)]);
        assert!(stored.status.last_reconciled.is_some());
        assert!(stored.status.last_error.is_none());
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let (store, key, v1) = seeded();
        store
            .external_update(&key, WatchStatus::default())
            .expect("external");
        let coordinator = WriteBackCoordinator::new(store, Duration::from_secs(5));

        let changes = diff_entries(&[], &[entry("a.txt", 10)]);
        let err = coordinator
            .apply(&key, &v1, &[], &changes)
            .await
            .unwrap_err();
        assert!(matches!(err, WriteBackError::Conflict(_)), "got {err}");
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let (store, key, v1) = seeded();
        store.remove(&key);
        let coordinator = WriteBackCoordinator::new(store, Duration::from_secs(5));

        let err = coordinator
            .apply(&key, &v1, &[], &ChangeSet::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WriteBackError::NotFound(_)));
        assert!(matches!(
            coordinator.refetch(&key).await.unwrap_err(),
            WriteBackError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn slow_store_call_times_out_as_transient() {
        let coordinator =
            WriteBackCoordinator::new(Arc::new(SlowStore), Duration::from_millis(20));
        let err = coordinator
            .refetch(&RecordKey::new("a", "b"))
            .await
            .unwrap_err();
        match err {
            WriteBackError::Transient(inner) => {
                assert!(inner.to_string().contains("timed out"))
            }
            other => panic!("expected transient, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refetch_returns_current_version() {
        let (store, key, _v1) = seeded();
        let v2 = store
            .external_update(
                &key,
                WatchStatus {
                    files: vec![entry("x.txt", 1)],
                    ..WatchStatus::default()
                },
            )
            .expect("external");
        let coordinator = WriteBackCoordinator::new(store, Duration::from_secs(5));
        let fresh = coordinator.refetch(&key).await.expect("refetch");
        assert_eq!(fresh.resource_version, v2);
        assert_eq!(fresh.status.files.len(), 1);
    }
}
