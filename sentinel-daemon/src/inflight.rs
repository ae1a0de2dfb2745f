//! The in-flight set: record keys with a reconcile currently running.
//!
//! Claiming is insert-if-absent under one lock, and the returned guard
//! releases the key on drop, including when the task holding it panics or
//! is aborted.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sentinel_core::RecordKey;

#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    keys: Arc<Mutex<HashSet<RecordKey>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` if another task already holds it.
    pub fn try_claim(&self, key: &RecordKey) -> Option<InFlightGuard> {
        if self.lock().insert(key.clone()) {
            Some(InFlightGuard {
                set: self.clone(),
                key: key.clone(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<RecordKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlightSet,
    key: RecordKey,
}

impl InFlightGuard {
    pub fn key(&self) -> &RecordKey {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn second_claim_fails_until_guard_drops() {
        let set = InFlightSet::new();
        let key = RecordKey::new("ns", "a");

        let guard = set.try_claim(&key).expect("first claim");
        assert!(set.try_claim(&key).is_none());
        assert!(set.contains(&key));
        assert_eq!(guard.key(), &key);

        drop(guard);
        assert!(set.is_empty());
        assert!(set.try_claim(&key).is_some());
    }

    #[test]
    fn distinct_keys_do_not_block_each_other() {
        let set = InFlightSet::new();
        let _a = set.try_claim(&RecordKey::new("ns", "a")).expect("a");
        let _b = set.try_claim(&RecordKey::new("ns", "b")).expect("b");
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn guard_is_released_when_task_panics() {
        let set = InFlightSet::new();
        let key = RecordKey::new("ns", "a");
        let guard = set.try_claim(&key).expect("claim");

        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("worker blew up");
        });
        assert!(handle.await.is_err());
        assert!(!set.contains(&key));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn at_most_one_holder_under_concurrent_claims() {
        let set = InFlightSet::new();
        let key = RecordKey::new("ns", "hot");
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let wins = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..128 {
            let set = set.clone();
            let key = key.clone();
            let active = active.clone();
            let peak = peak.clone();
            let wins = wins.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    if let Some(_guard) = set.try_claim(&key) {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        wins.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_micros(50)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(wins.load(Ordering::SeqCst) >= 1);
        assert!(set.is_empty());
    }
}
