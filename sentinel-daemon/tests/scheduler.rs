use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use sentinel_core::{
    ListRequest, MemoryStore, RecordKey, RecordPage, RecordStore, ResourceVersion, StatusSnapshot,
    StoreError, WatchRecord, WatchSpec, WatchStatus,
};
use sentinel_daemon::{ControllerConfig, Scheduler, SchedulerSettings};
use sentinel_reconcile::{
    BackoffPolicy, FailureKind, Outcome, RecordWorker, WorkerSettings, WriteBackCoordinator,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Wraps a [`MemoryStore`]; `update_status` can be held at a gate, counted,
/// or failed, and `list` can be held at the same gate or failed.
#[derive(Default)]
struct GatedStore {
    inner: MemoryStore,
    gate_open: Mutex<bool>,
    gate: Condvar,
    gated: bool,
    gate_list: bool,
    fail_list: bool,
    fail_updates: bool,
    list_calls: AtomicUsize,
    update_calls: AtomicUsize,
    active_updates: AtomicUsize,
    peak_updates: AtomicUsize,
}

impl GatedStore {
    fn gated() -> Self {
        Self {
            gated: true,
            ..Self::default()
        }
    }

    fn open_gate(&self) {
        *self.gate_open.lock().unwrap() = true;
        self.gate.notify_all();
    }

    fn wait_for_gate(&self) {
        let mut open = self.gate_open.lock().unwrap();
        while !*open {
            open = self.gate.wait(open).unwrap();
        }
    }
}

impl RecordStore for GatedStore {
    fn list(&self, request: &ListRequest) -> Result<RecordPage, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.gate_list {
            self.wait_for_gate();
        }
        if self.fail_list {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        self.inner.list(request)
    }

    fn get_status(&self, key: &RecordKey) -> Result<StatusSnapshot, StoreError> {
        self.inner.get_status(key)
    }

    fn update_status(
        &self,
        key: &RecordKey,
        expected: &ResourceVersion,
        status: &WatchStatus,
    ) -> Result<ResourceVersion, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active_updates.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_updates.fetch_max(now, Ordering::SeqCst);
        if self.gated {
            self.wait_for_gate();
        }
        let result = if self.fail_updates {
            Err(StoreError::Unavailable("write path down".into()))
        } else {
            self.inner.update_status(key, expected, status)
        };
        self.active_updates.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn seed(store: &MemoryStore, name: &str, root: &Path) -> RecordKey {
    let key = RecordKey::new("default", name);
    store.insert(WatchRecord::new(
        key.clone(),
        WatchSpec {
            path: root.to_path_buf(),
            recursive: false,
        },
    ));
    key
}

fn tree() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), b"hello").expect("write");
    dir
}

fn settings(poll: Duration, backoff: BackoffPolicy) -> SchedulerSettings {
    SchedulerSettings {
        namespace: None,
        page_size: 10,
        concurrency: 4,
        poll_interval: poll,
        store_timeout: Duration::from_secs(10),
        shutdown_grace: Duration::from_secs(5),
        backoff,
    }
}

fn scheduler_over(store: Arc<GatedStore>, settings: SchedulerSettings, worker: WorkerSettings) -> Scheduler {
    let store: Arc<dyn RecordStore> = store;
    let worker = RecordWorker::new(
        WriteBackCoordinator::new(Arc::clone(&store), settings.store_timeout),
        worker,
    );
    Scheduler::with_worker(store, worker, settings)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_dispatch_of_one_record_never_runs_two_workers() {
    let dir = tree();
    let store = Arc::new(GatedStore::gated());
    let key = seed(&store.inner, "hot", dir.path());
    let mut scheduler = scheduler_over(
        store.clone(),
        settings(Duration::from_secs(60), BackoffPolicy::default()),
        WorkerSettings::default(),
    );
    let (shutdown, _rx) = broadcast::channel(1);

    let mut dispatched = 0;
    let mut skipped = 0;
    for _ in 0..150 {
        let cycle = scheduler.run_cycle(&shutdown).await.expect("cycle");
        dispatched += cycle.dispatched;
        skipped += cycle.skipped_in_flight;
    }
    assert_eq!(dispatched, 1);
    assert_eq!(skipped, 149);
    assert!(scheduler.in_flight().contains(&key));

    store.open_gate();
    scheduler.run_once().await.expect("drain");

    assert_eq!(store.peak_updates.load(Ordering::SeqCst), 1);
    assert!(scheduler.in_flight().is_empty());
    assert_eq!(store.inner.get(&key).expect("record").status.files.len(), 1);
}

#[tokio::test]
async fn transient_failure_defers_record_until_backoff_elapses() {
    let dir = tree();
    let store = Arc::new(GatedStore {
        fail_updates: true,
        ..GatedStore::default()
    });
    let key = seed(&store.inner, "flaky", dir.path());
    let spacing = BackoffPolicy {
        base: Duration::from_millis(200),
        max: Duration::from_secs(1),
        max_attempts: 1,
    };
    let mut scheduler = scheduler_over(
        store.clone(),
        settings(Duration::from_secs(60), spacing),
        WorkerSettings {
            backoff: spacing,
            ..WorkerSettings::default()
        },
    );

    let (_, reports) = scheduler.run_once().await.expect("first");
    assert_eq!(reports[0].outcome, Outcome::Failed(FailureKind::Transient));
    assert_eq!(scheduler.deferred(&key).expect("deferred").attempt, 1);

    let (cycle, _) = scheduler.run_once().await.expect("too early");
    assert_eq!(cycle.skipped_not_due, 1);
    assert_eq!(cycle.dispatched, 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let (cycle, _) = scheduler.run_once().await.expect("due again");
    assert_eq!(cycle.dispatched, 1);
    assert_eq!(scheduler.deferred(&key).expect("deferred").attempt, 2);

    store.inner.remove(&key);
    let (cycle, _) = scheduler.run_once().await.expect("record gone");
    assert_eq!(cycle.enumerated, 0);
    assert!(scheduler.deferred(&key).is_none());
}

#[tokio::test]
async fn enumeration_failure_skips_the_whole_cycle() {
    let dir = tree();
    let store = Arc::new(GatedStore {
        fail_list: true,
        ..GatedStore::default()
    });
    seed(&store.inner, "a", dir.path());
    let mut scheduler = scheduler_over(
        store.clone(),
        settings(Duration::from_millis(20), BackoffPolicy::default()),
        WorkerSettings::default(),
    );
    let stats = scheduler.stats();
    let (shutdown, _rx) = broadcast::channel(1);

    assert!(scheduler.run_cycle(&shutdown).await.is_err());
    assert_eq!(scheduler.running(), 0);

    let handle = tokio::spawn(scheduler.run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.send(()).expect("scheduler listening");
    handle.await.expect("join").expect("run");

    let snap = stats.snapshot();
    assert_eq!(snap.cycles, 0);
    assert!(snap.skipped_cycles >= 2, "{snap:?}");
    assert_eq!(store.active_updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cycles_start_on_the_poll_interval() {
    let dir = tree();
    let store = Arc::new(GatedStore::default());
    seed(&store.inner, "a", dir.path());
    let scheduler = scheduler_over(
        store.clone(),
        settings(Duration::from_millis(50), BackoffPolicy::default()),
        WorkerSettings::default(),
    );
    let (shutdown, _rx) = broadcast::channel(1);

    let handle = tokio::spawn(scheduler.run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(230)).await;
    shutdown.send(()).expect("scheduler listening");
    handle.await.expect("join").expect("run");

    let cycles = store.list_calls.load(Ordering::SeqCst);
    assert!((3..=7).contains(&cycles), "expected ~5 cycles, saw {cycles}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_aborts_workers_that_outlive_the_grace_period() {
    let dir = tree();
    let store = Arc::new(GatedStore::gated());
    let key = seed(&store.inner, "stuck", dir.path());
    let mut tight = settings(Duration::from_secs(60), BackoffPolicy::default());
    tight.shutdown_grace = Duration::from_millis(50);
    let scheduler = scheduler_over(store.clone(), tight, WorkerSettings::default());
    let in_flight = scheduler.in_flight();
    let (shutdown, _rx) = broadcast::channel(1);

    let handle = tokio::spawn(scheduler.run(shutdown.clone()));
    while store.active_updates.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(in_flight.contains(&key));

    shutdown.send(()).expect("scheduler listening");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run must return after the grace period")
        .expect("join")
        .expect("run");

    assert!(in_flight.is_empty());
    store.open_gate();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_records_do_not_start_after_shutdown() {
    let dirs: Vec<TempDir> = (0..3).map(|_| tree()).collect();
    let store = Arc::new(GatedStore::gated());
    for (name, dir) in ["a", "b", "c"].iter().zip(&dirs) {
        seed(&store.inner, name, dir.path());
    }
    let mut single = settings(Duration::from_secs(60), BackoffPolicy::default());
    single.concurrency = 1;
    let scheduler = scheduler_over(store.clone(), single, WorkerSettings::default());
    let in_flight = scheduler.in_flight();
    let (shutdown, _rx) = broadcast::channel(1);

    let handle = tokio::spawn(scheduler.run(shutdown.clone()));
    while store.active_updates.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(in_flight.len(), 3);

    shutdown.send(()).expect("scheduler listening");
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.open_gate();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run must return once the running worker finishes")
        .expect("join")
        .expect("run");

    assert_eq!(store.update_calls.load(Ordering::SeqCst), 1);
    assert!(in_flight.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_enumeration_times_out_and_skips_the_cycle() {
    let dir = tree();
    let store = Arc::new(GatedStore {
        gate_list: true,
        ..GatedStore::default()
    });
    seed(&store.inner, "a", dir.path());
    let mut impatient = settings(Duration::from_secs(60), BackoffPolicy::default());
    impatient.store_timeout = Duration::from_millis(50);
    let mut scheduler = scheduler_over(store.clone(), impatient, WorkerSettings::default());
    let (shutdown, _rx) = broadcast::channel(1);

    let err = scheduler.run_cycle(&shutdown).await.unwrap_err();
    store.open_gate();

    assert!(err.to_string().contains("timed out"), "{err}");
    assert_eq!(scheduler.running(), 0);
    assert!(scheduler.in_flight().is_empty());
    assert_eq!(store.update_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn config_driven_scheduler_uses_configured_namespace() {
    let dir = tree();
    let store = Arc::new(MemoryStore::new());
    seed(&store, "a", dir.path());
    let config = ControllerConfig {
        namespace: Some("elsewhere".into()),
        ..ControllerConfig::default()
    };
    let mut scheduler = Scheduler::new(store, &config);
    let (cycle, reports) = scheduler.run_once().await.expect("cycle");
    assert_eq!(cycle.enumerated, 0);
    assert!(reports.is_empty());
}
