//! Integration tests for hybridkv
//!
//! The store runs against [`MemoryEngine`] so every scenario is hermetic;
//! an instrumented wrapper engine is used where the tests need to observe
//! session handout behavior.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use hybridkv::engine::{
    Engine, EngineResult, EngineSession, LogBounds, ReadResult, Status, Step,
};
use hybridkv::{KvError, KvStore, MemoryEngine, StoreOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Payload {
    count: u32,
    text: String,
    flags: Vec<bool>,
}

fn payload(seed: u32) -> Payload {
    Payload {
        count: seed,
        text: format!("payload-{seed}"),
        flags: vec![seed % 2 == 0, seed % 3 == 0],
    }
}

fn no_compaction_options() -> StoreOptions {
    StoreOptions::builder().time_between_compactions_ms(-1).build()
}

/// Route scheduler trace/warn events to the test output when RUST_LOG is set.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn memory_store() -> (Arc<MemoryEngine>, KvStore<String, Payload>) {
    let engine = Arc::new(MemoryEngine::new());
    let store =
        KvStore::with_engine(Arc::clone(&engine) as Arc<dyn Engine>, no_compaction_options())
            .unwrap();
    (engine, store)
}

// =============================================================================
// Write / Read / Delete
// =============================================================================

#[test]
fn upsert_then_read_returns_last_written_value() {
    let (_engine, store) = memory_store();
    let key = "k".to_string();

    store.upsert(&key, &payload(1)).unwrap();
    assert_eq!(store.read(&key).unwrap(), (Status::Ok, Some(payload(1))));

    store.upsert(&key, &payload(2)).unwrap();
    assert_eq!(store.read(&key).unwrap(), (Status::Ok, Some(payload(2))));
}

#[test]
fn read_of_missing_key_is_not_found_without_decode() {
    let (_engine, store) = memory_store();
    assert_eq!(
        store.read(&"missing".to_string()).unwrap(),
        (Status::NotFound, None)
    );
}

#[test]
fn delete_makes_key_invisible() {
    let (_engine, store) = memory_store();
    let key = "k".to_string();

    store.upsert(&key, &payload(7)).unwrap();
    assert_eq!(store.delete(&key).unwrap(), Status::Ok);
    assert_eq!(store.read(&key).unwrap(), (Status::NotFound, None));

    // Deleting an absent key reports NotFound, and the key stays gone.
    assert_eq!(store.delete(&key).unwrap(), Status::NotFound);
    assert_eq!(store.read(&key).unwrap(), (Status::NotFound, None));
}

#[test]
fn pending_reads_resolve_to_the_written_value() {
    let (engine, store) = memory_store();
    let key = "pending".to_string();
    store.upsert(&key, &payload(9)).unwrap();

    engine.simulate_pending_reads(true);
    assert_eq!(store.read(&key).unwrap(), (Status::Ok, Some(payload(9))));
    assert_eq!(
        store.read(&"absent".to_string()).unwrap(),
        (Status::NotFound, None)
    );
}

#[test]
fn integer_keys_and_values_round_trip() {
    let engine = Arc::new(MemoryEngine::new());
    let store: KvStore<u64, i32> =
        KvStore::with_engine(Arc::clone(&engine) as Arc<dyn Engine>, no_compaction_options())
            .unwrap();

    for i in 0..100u64 {
        store.upsert(&i, &-(i as i32)).unwrap();
    }
    for i in 0..100u64 {
        assert_eq!(store.read(&i).unwrap(), (Status::Ok, Some(-(i as i32))));
    }
}

// =============================================================================
// Disposal
// =============================================================================

#[test]
fn operations_fail_after_close() {
    let (engine, store) = memory_store();
    let key = "k".to_string();
    store.upsert(&key, &payload(1)).unwrap();

    let records_before = engine.record_count();
    store.close().unwrap();

    assert!(matches!(
        store.upsert(&key, &payload(2)),
        Err(KvError::StoreDisposed)
    ));
    assert!(matches!(store.delete(&key), Err(KvError::StoreDisposed)));
    assert!(matches!(store.read(&key), Err(KvError::StoreDisposed)));

    // No engine side effects from the rejected calls.
    assert_eq!(engine.record_count(), records_before);
}

#[test]
fn close_twice_is_a_noop() {
    let (_engine, store) = memory_store();
    store.close().unwrap();
    store.close().unwrap();
    assert!(store.is_closed());
}

#[test]
fn external_engine_survives_store_close() {
    let (engine, store) = memory_store();
    store.upsert(&"k".to_string(), &payload(3)).unwrap();
    store.close().unwrap();

    // The engine was supplied by the caller, so the store must not have
    // disposed it: new sessions still work.
    assert_eq!(engine.open_sessions(), 0);
    let mut session = engine.new_session().unwrap();
    let result = session.read(b"probe").unwrap().resolve().unwrap();
    assert_eq!(result.status, Status::NotFound);
}

#[test]
fn owned_engine_log_file_is_deleted_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions::builder()
        .log_directory(dir.path())
        .log_file_name_prefix("owned")
        .time_between_compactions_ms(-1)
        .build();

    let store: KvStore<String, u64> = KvStore::open::<MemoryEngine>(options).unwrap();
    let log_path = dir.path().join("owned.log");
    assert!(log_path.exists());

    store.upsert(&"k".to_string(), &1).unwrap();
    store.close().unwrap();
    assert!(!log_path.exists());
}

#[test]
fn owned_engine_log_file_is_kept_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions::builder()
        .log_directory(dir.path())
        .log_file_name_prefix("kept")
        .delete_log_on_close(false)
        .time_between_compactions_ms(-1)
        .build();

    let store: KvStore<String, u64> = KvStore::open::<MemoryEngine>(options).unwrap();
    store.close().unwrap();
    assert!(dir.path().join("kept.log").exists());
}

#[test]
fn drop_disposes_the_store() {
    let engine = Arc::new(MemoryEngine::new());
    {
        let store: KvStore<String, u64> =
            KvStore::with_engine(Arc::clone(&engine) as Arc<dyn Engine>, no_compaction_options())
                .unwrap();
        store.upsert(&"k".to_string(), &1).unwrap();
    }
    assert_eq!(engine.open_sessions(), 0);
}

// =============================================================================
// Concurrency
// =============================================================================

const CONCURRENT_KEYS: u32 = 10_000;
const WRITER_THREADS: u32 = 8;

#[test]
fn concurrent_upsert_read_delete_cycle() {
    let (_engine, store) = memory_store();
    let store = &store;

    // Phase 1: concurrent upserts across disjoint key ranges.
    thread::scope(|scope| {
        for t in 0..WRITER_THREADS {
            scope.spawn(move || {
                let mut i = t;
                while i < CONCURRENT_KEYS {
                    store.upsert(&format!("key-{i}"), &payload(i)).unwrap();
                    i += WRITER_THREADS;
                }
            });
        }
    });

    // Phase 2: concurrent reads observe the last written value.
    thread::scope(|scope| {
        for t in 0..WRITER_THREADS {
            scope.spawn(move || {
                let mut i = t;
                while i < CONCURRENT_KEYS {
                    let (status, value) = store.read(&format!("key-{i}")).unwrap();
                    assert_eq!(status, Status::Ok);
                    assert_eq!(value, Some(payload(i)));
                    i += WRITER_THREADS;
                }
            });
        }
    });

    // Phase 3: concurrent deletes, then everything is gone.
    thread::scope(|scope| {
        for t in 0..WRITER_THREADS {
            scope.spawn(move || {
                let mut i = t;
                while i < CONCURRENT_KEYS {
                    assert_eq!(store.delete(&format!("key-{i}")).unwrap(), Status::Ok);
                    i += WRITER_THREADS;
                }
            });
        }
    });

    for i in (0..CONCURRENT_KEYS).step_by(997) {
        assert_eq!(
            store.read(&format!("key-{i}")).unwrap(),
            (Status::NotFound, None)
        );
    }
}

// =============================================================================
// Session Handout Instrumentation
// =============================================================================

/// Wraps MemoryEngine and flags any session observed by two operations at
/// once. A violation would mean the pool handed the same session to two
/// concurrent callers.
struct InstrumentedEngine {
    inner: MemoryEngine,
    violation: Arc<AtomicBool>,
}

struct InstrumentedSession {
    inner: Box<dyn EngineSession>,
    active: AtomicUsize,
    violation: Arc<AtomicBool>,
}

impl InstrumentedSession {
    fn enter(&self) {
        if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.violation.store(true, Ordering::SeqCst);
        }
        // Widen the race window so overlap would actually be caught.
        thread::yield_now();
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EngineSession for InstrumentedSession {
    fn upsert(&mut self, key: &[u8], value: &[u8]) -> EngineResult<Step<Status>> {
        self.enter();
        let result = self.inner.upsert(key, value);
        self.exit();
        result
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<Status> {
        self.enter();
        let result = self.inner.delete(key);
        self.exit();
        result
    }

    fn read(&mut self, key: &[u8]) -> EngineResult<Step<ReadResult>> {
        self.enter();
        let result = self.inner.read(key);
        self.exit();
        result
    }

    fn compact_until(&mut self, address: u64, shift_begin_address: bool) -> EngineResult<()> {
        self.enter();
        let result = self.inner.compact_until(address, shift_begin_address);
        self.exit();
        result
    }
}

impl Engine for InstrumentedEngine {
    fn new_session(&self) -> EngineResult<Box<dyn EngineSession>> {
        Ok(Box::new(InstrumentedSession {
            inner: self.inner.new_session()?,
            active: AtomicUsize::new(0),
            violation: Arc::clone(&self.violation),
        }))
    }

    fn log_bounds(&self) -> LogBounds {
        self.inner.log_bounds()
    }

    fn dispose(&self) -> EngineResult<()> {
        self.inner.dispose()
    }
}

#[test]
fn no_session_is_shared_between_concurrent_operations() {
    let violation = Arc::new(AtomicBool::new(false));
    let engine = Arc::new(InstrumentedEngine {
        inner: MemoryEngine::new(),
        violation: Arc::clone(&violation),
    });
    let store: KvStore<u32, u32> =
        KvStore::with_engine(Arc::clone(&engine) as Arc<dyn Engine>, no_compaction_options())
            .unwrap();
    let store = &store;

    thread::scope(|scope| {
        for t in 0..8u32 {
            scope.spawn(move || {
                for i in 0..2_000u32 {
                    let k = t * 10_000 + i;
                    store.upsert(&k, &i).unwrap();
                    store.read(&k).unwrap();
                    store.delete(&k).unwrap();
                }
            });
        }
    });

    assert!(
        !violation.load(Ordering::SeqCst),
        "a session was observed by two concurrent operations"
    );
}

// =============================================================================
// Compaction Scheduler (live)
// =============================================================================

#[test]
fn scheduler_compacts_once_region_exceeds_threshold() {
    init_logging();
    let engine = Arc::new(MemoryEngine::new());
    let options = StoreOptions::builder()
        .time_between_compactions_ms(10)
        .initial_compaction_threshold_bytes(1024)
        .build();
    let store: KvStore<u32, String> =
        KvStore::with_engine(Arc::clone(&engine) as Arc<dyn Engine>, options).unwrap();

    let begin_at_start = engine.log_bounds().begin_address;

    // Push the safe-readonly region well past the 1 KiB threshold.
    for i in 0..200u32 {
        store.upsert(&i, &"x".repeat(64)).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.log_bounds().begin_address == begin_at_start {
        assert!(
            Instant::now() < deadline,
            "scheduler never compacted: {:?}",
            engine.log_bounds()
        );
        thread::sleep(Duration::from_millis(10));
    }

    // Compaction reclaims from the front; data must still be readable.
    assert_eq!(
        store.read(&0).unwrap(),
        (Status::Ok, Some("x".repeat(64)))
    );
    store.close().unwrap();
}

#[test]
fn scheduler_skips_while_region_is_below_threshold() {
    init_logging();
    let engine = Arc::new(MemoryEngine::new());
    let options = StoreOptions::builder()
        .time_between_compactions_ms(5)
        .initial_compaction_threshold_bytes(1 << 30)
        .build();
    let store: KvStore<u32, u32> =
        KvStore::with_engine(Arc::clone(&engine) as Arc<dyn Engine>, options).unwrap();

    for i in 0..50u32 {
        store.upsert(&i, &i).unwrap();
    }
    let begin = engine.log_bounds().begin_address;
    thread::sleep(Duration::from_millis(100));

    // Region is far below the 1 GiB threshold: every evaluation skips.
    assert_eq!(engine.log_bounds().begin_address, begin);
    store.close().unwrap();
}

#[test]
fn disabled_scheduler_never_compacts() {
    let engine = Arc::new(MemoryEngine::new());
    let options = StoreOptions::builder()
        .time_between_compactions_ms(-1)
        .initial_compaction_threshold_bytes(1)
        .build();
    let store: KvStore<u32, String> =
        KvStore::with_engine(Arc::clone(&engine) as Arc<dyn Engine>, options).unwrap();

    for i in 0..100u32 {
        store.upsert(&i, &"y".repeat(128)).unwrap();
    }
    let begin = engine.log_bounds().begin_address;
    thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.log_bounds().begin_address, begin);
}
