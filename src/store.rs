//! Store facade
//!
//! The public surface: a typed, concurrency-safe key/value API over an
//! abstract log-structured engine.
//!
//! ## Operation flow
//!
//! ```text
//! caller ──► disposed check ──► codec + buffer lease ──► session lease
//!                                       │                     │
//!                                       ▼                     ▼
//!                              key/value byte spans ──► engine call
//!                                                           │
//!                             decode (reads) ◄── pending? wait
//!                                                           │
//!                              leases return buffer/session to pools
//! ```
//!
//! No global lock serializes operations: safety comes entirely from each
//! operation exclusively owning one pooled session and one pooled buffer
//! for its duration.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::BinaryCodec;
use crate::compaction::{CompactionPolicy, CompactionScheduler};
use crate::config::StoreOptions;
use crate::engine::{Engine, EngineError, LogDevice, OpenEngine, Status};
use crate::error::{KvError, Result};
use crate::pool::{BorrowStrategy, BufferPool, SessionPool};

/// A typed key/value store over a hybrid log-structured engine
///
/// Cheap to share behind an `Arc`; all operations take `&self` and are safe
/// to issue from any number of threads concurrently.
pub struct KvStore<K, V> {
    engine: Arc<dyn Engine>,
    sessions: Arc<SessionPool>,
    buffers: BufferPool,
    codec: BinaryCodec,
    scheduler: Option<CompactionScheduler>,
    /// Device handle for a store-constructed engine, disposed last
    device: Mutex<Option<Box<dyn LogDevice>>>,
    /// Whether disposal tears down the engine (false for a supplied engine)
    owns_engine: bool,
    disposed: AtomicBool,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> KvStore<K, V>
where
    K: Serialize,
    V: Serialize + DeserializeOwned,
{
    // =========================================================================
    // Construction
    // =========================================================================

    /// Open a store with an internally constructed engine.
    ///
    /// The engine and its log device are owned by the store and torn down
    /// on [`close`](Self::close).
    pub fn open<E: OpenEngine + 'static>(options: StoreOptions) -> Result<Self> {
        let settings = options.log_settings();
        let (engine, device) = E::open(&settings).map_err(KvError::Engine)?;
        Self::build(Arc::new(engine), Some(Box::new(device)), true, options)
    }

    /// Open a store over a caller-supplied engine.
    ///
    /// The store does not dispose the engine on close and performs no
    /// device cleanup; engine sizing and log-location options are ignored.
    pub fn with_engine(engine: Arc<dyn Engine>, options: StoreOptions) -> Result<Self> {
        Self::build(engine, None, false, options)
    }

    fn build(
        engine: Arc<dyn Engine>,
        device: Option<Box<dyn LogDevice>>,
        owns_engine: bool,
        options: StoreOptions,
    ) -> Result<Self> {
        let sessions = Arc::new(SessionPool::new(Arc::clone(&engine)));

        // Negative cadence disables compaction: no thread is started.
        let scheduler = if options.time_between_compactions_ms >= 0 {
            let policy = CompactionPolicy::new(
                options.compaction_threshold(),
                options.compaction.clone(),
            );
            Some(CompactionScheduler::start(
                Arc::clone(&engine),
                Arc::clone(&sessions),
                policy,
                Duration::from_millis(options.time_between_compactions_ms as u64),
            ))
        } else {
            None
        };

        Ok(Self {
            engine,
            sessions,
            buffers: BufferPool::new(),
            codec: BinaryCodec::new(options.codec),
            scheduler,
            device: Mutex::new(device),
            owns_engine,
            disposed: AtomicBool::new(false),
            _marker: PhantomData,
        })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Insert a record or overwrite an existing one.
    ///
    /// Waits for the engine if the write goes pending on I/O.
    pub fn upsert(&self, key: &K, value: &V) -> Result<()> {
        self.ensure_open()?;

        let mut session = self.sessions.acquire(BorrowStrategy::FastPath)?;
        let mut buf = self.buffers.acquire();

        // Key then value, back to back in one allocation; the boundary is
        // all the engine needs to see them as two spans.
        let key_len = self.codec.encode(key, &mut buf)?;
        self.codec.encode(value, &mut buf)?;
        let (key_bytes, value_bytes) = buf.split_at(key_len);

        let status = session.upsert(key_bytes, value_bytes)?.resolve()?;
        match status {
            Status::Ok | Status::NotFound => Ok(()),
            Status::Error => Err(KvError::Engine(EngineError::Rejected(
                "upsert failed".to_string(),
            ))),
        }
    }

    /// Remove a record.
    ///
    /// The engine status is passed through unchanged: [`Status::Ok`] if the
    /// key existed, [`Status::NotFound`] if it did not.
    pub fn delete(&self, key: &K) -> Result<Status> {
        self.ensure_open()?;

        let mut session = self.sessions.acquire(BorrowStrategy::FastPath)?;
        let mut buf = self.buffers.acquire();
        self.codec.encode(key, &mut buf)?;

        let status = session.delete(&buf)?;
        Ok(status)
    }

    /// Point-read a record, waiting if the engine reports the read pending
    /// on I/O.
    ///
    /// Returns `(Status::Ok, Some(value))` on a hit and `(status, None)`
    /// otherwise; a non-`Ok` status never attempts a decode.
    pub fn read(&self, key: &K) -> Result<(Status, Option<V>)> {
        self.ensure_open()?;

        let mut session = self.sessions.acquire(BorrowStrategy::PooledPath)?;
        let step = {
            let mut buf = self.buffers.acquire();
            self.codec.encode(key, &mut buf)?;
            session.read(&buf)?
            // buffer lease ends here: the scratch bytes go back to the pool
            // before any blocking completion wait
        };
        let result = step.resolve()?;
        drop(session);

        match result.status {
            Status::Ok => {
                let payload = result.payload.ok_or_else(|| {
                    KvError::Engine(EngineError::Rejected(
                        "read returned Ok without a payload".to_string(),
                    ))
                })?;
                // The engine-owned memory is only valid until released, so
                // decode strictly before release. An early return on decode
                // failure still releases through Drop.
                let value: V = self.codec.decode(payload.as_slice())?;
                payload.release();
                Ok((Status::Ok, Some(value)))
            }
            status => {
                if let Some(payload) = result.payload {
                    payload.release();
                }
                Ok((status, None))
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(KvError::StoreDisposed)
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

impl<K, V> KvStore<K, V> {
    /// Dispose the store: cancel the compaction scheduler, drain and
    /// dispose all pooled sessions, then tear down a store-owned engine
    /// and its log device, in that order.
    ///
    /// Idempotent: the second and later calls are no-ops. Every public
    /// operation issued after this fails with [`KvError::StoreDisposed`].
    pub fn close(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("disposing store");

        // 1. Signal the scheduler; it exits on its own next wake. The
        //    thread join happens when the handle drops with the store.
        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel();
        }

        // 2. Sessions before engine: engines assert no open sessions remain.
        self.sessions.close();

        // 3 & 4. Engine, then its device. A failure in either is reported
        //    but does not stop the remaining teardown.
        let mut failure: Option<EngineError> = None;
        if self.owns_engine {
            if let Err(error) = self.engine.dispose() {
                warn!(%error, "engine disposal failed");
                failure = Some(error);
            }
            if let Some(mut device) = self.device.lock().take() {
                if let Err(error) = device.dispose() {
                    warn!(%error, "log device disposal failed");
                    failure.get_or_insert(error);
                }
            }
        }

        match failure {
            Some(error) => Err(KvError::Engine(error)),
            None => Ok(()),
        }
    }

    /// Whether the store has been disposed.
    pub fn is_closed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl<K, V> Drop for KvStore<K, V> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
