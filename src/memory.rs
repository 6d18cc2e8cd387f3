//! In-memory engine
//!
//! A heap-only implementation of the [`engine`](crate::engine) interface.
//! It keeps records in a hash map and fakes the hybrid log's address space
//! with monotonically advancing counters, which is enough for the store's
//! pools, codec, and compaction scheduler to run unmodified. Used by the
//! crate's tests and benchmarks, and usable as a lightweight embedded
//! engine when durability is not needed.
//!
//! ## Address model
//!
//! Every upsert/delete "appends a record": the tail advances by a fixed
//! per-record overhead plus the payload length, and the safe-readonly
//! boundary follows the tail. `compact_until` moves the begin address
//! forward. Addresses start at a non-zero value, the way log engines
//! reserve a null prefix.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::engine::{
    Completion, Engine, EngineBuffer, EngineError, EngineResult, EngineSession, LogBounds,
    LogDevice, LogSettings, OpenEngine, ReadResult, Status, Step,
};

/// First valid log address
const INITIAL_ADDRESS: u64 = 64;

/// Synthetic per-record header size used for address accounting
const RECORD_OVERHEAD: u64 = 24;

struct Shared {
    records: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    begin_address: AtomicU64,
    safe_read_only_address: AtomicU64,
    tail_address: AtomicU64,
    open_sessions: AtomicUsize,
    sessions_created: AtomicUsize,
    closed: AtomicBool,
    simulate_pending_reads: AtomicBool,
}

impl Shared {
    fn append_record(&self, payload_bytes: u64) {
        let tail = self
            .tail_address
            .fetch_add(RECORD_OVERHEAD + payload_bytes, Ordering::SeqCst)
            + RECORD_OVERHEAD
            + payload_bytes;
        // This engine has no page eviction: everything behind the tail is
        // immediately safe-readonly. Concurrent writers publish their tails
        // in any order, so fetch_max keeps the boundary monotone.
        self.safe_read_only_address.fetch_max(tail, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn lookup(&self, key: &[u8]) -> ReadResult {
        match self.records.read().get(key) {
            Some(value) => ReadResult {
                status: Status::Ok,
                payload: Some(EngineBuffer::new(Bytes::copy_from_slice(value))),
            },
            None => ReadResult {
                status: Status::NotFound,
                payload: None,
            },
        }
    }
}

/// Heap-backed engine with a synthetic log address space
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    /// Create an engine with no backing device.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                records: RwLock::new(HashMap::new()),
                begin_address: AtomicU64::new(INITIAL_ADDRESS),
                safe_read_only_address: AtomicU64::new(INITIAL_ADDRESS),
                tail_address: AtomicU64::new(INITIAL_ADDRESS),
                open_sessions: AtomicUsize::new(0),
                sessions_created: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                simulate_pending_reads: AtomicBool::new(false),
            }),
        }
    }

    /// Make every read report pending and resolve through a completion,
    /// exercising callers' pending paths.
    pub fn simulate_pending_reads(&self, enabled: bool) {
        self.shared
            .simulate_pending_reads
            .store(enabled, Ordering::Release);
    }

    /// Number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }

    /// Total sessions ever created.
    pub fn sessions_created(&self) -> usize {
        self.shared.sessions_created.load(Ordering::SeqCst)
    }

    /// Number of live records.
    pub fn record_count(&self) -> usize {
        self.shared.records.read().len()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MemoryEngine {
    fn new_session(&self) -> EngineResult<Box<dyn EngineSession>> {
        self.shared.ensure_open()?;
        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        self.shared.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn log_bounds(&self) -> LogBounds {
        LogBounds {
            begin_address: self.shared.begin_address.load(Ordering::SeqCst),
            safe_read_only_address: self.shared.safe_read_only_address.load(Ordering::SeqCst),
            tail_address: self.shared.tail_address.load(Ordering::SeqCst),
        }
    }

    fn dispose(&self) -> EngineResult<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let open = self.shared.open_sessions.load(Ordering::SeqCst);
        if open > 0 {
            return Err(EngineError::SessionsOpen(open));
        }
        self.shared.records.write().clear();
        Ok(())
    }
}

struct MemorySession {
    shared: Arc<Shared>,
}

impl EngineSession for MemorySession {
    fn upsert(&mut self, key: &[u8], value: &[u8]) -> EngineResult<Step<Status>> {
        self.shared.ensure_open()?;
        self.shared
            .records
            .write()
            .insert(key.to_vec(), value.to_vec());
        self.shared
            .append_record((key.len() + value.len()) as u64);
        Ok(Step::Done(Status::Ok))
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<Status> {
        self.shared.ensure_open()?;
        let existed = self.shared.records.write().remove(key).is_some();
        // Deletes append a tombstone record: key only.
        self.shared.append_record(key.len() as u64);
        Ok(if existed {
            Status::Ok
        } else {
            Status::NotFound
        })
    }

    fn read(&mut self, key: &[u8]) -> EngineResult<Step<ReadResult>> {
        self.shared.ensure_open()?;
        if self.shared.simulate_pending_reads.load(Ordering::Acquire) {
            let shared = Arc::clone(&self.shared);
            let key = key.to_vec();
            return Ok(Step::Pending(Completion::new(move || {
                shared.ensure_open()?;
                Ok(shared.lookup(&key))
            })));
        }
        Ok(Step::Done(self.shared.lookup(key)))
    }

    fn compact_until(&mut self, address: u64, shift_begin_address: bool) -> EngineResult<()> {
        self.shared.ensure_open()?;
        if shift_begin_address {
            let safe = self.shared.safe_read_only_address.load(Ordering::SeqCst);
            let target = address.min(safe);
            // Begin address never moves backwards.
            self.shared
                .begin_address
                .fetch_max(target, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.shared.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Device
// =============================================================================

/// File handle standing in for a log device
///
/// The engine itself never touches the file; the device exists so the
/// store's delete-on-close and device-disposal paths behave exactly as
/// they would with a disk-backed engine.
pub struct MemoryLogDevice {
    path: PathBuf,
    delete_on_close: bool,
    disposed: bool,
}

impl LogDevice for MemoryLogDevice {
    fn dispose(&mut self) -> EngineResult<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        if self.delete_on_close && self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl OpenEngine for MemoryEngine {
    type Device = MemoryLogDevice;

    fn open(settings: &LogSettings) -> EngineResult<(Self, Self::Device)> {
        if let Some(parent) = settings.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(&settings.log_path)?;

        Ok((
            Self::new(),
            MemoryLogDevice {
                path: settings.log_path.clone(),
                delete_on_close: settings.delete_on_close,
                disposed: false,
            },
        ))
    }
}
