//! Session pool
//!
//! Engine sessions are stateful, expensive to construct, and must never
//! have two concurrent users. The pool makes one session per in-flight
//! operation cheap: acquire checks the pool before asking the engine for a
//! new session, and the RAII lease returns the session when the operation
//! completes.
//!
//! ## Borrow strategies
//!
//! Historically this layer cached a session in thread-local storage for
//! synchronous hot paths, with the hazard that a continuation resuming on
//! another thread could clear or reuse the wrong instance. The replacement
//! is an explicit, per-call strategy:
//!
//! - [`BorrowStrategy::FastPath`] — the operation is expected to complete
//!   inline. It may use the store-owned single-entry hot slot in front of
//!   the shared queue. The slot belongs to the store, not to a thread or a
//!   process-wide static, so disposal can drain it deterministically. An
//!   operation that does go pending is still safe — its lease owns the
//!   session for the wait — the slot merely stays empty for longer.
//! - [`BorrowStrategy::PooledPath`] — the operation routinely blocks on a
//!   pending engine completion. It bypasses the hot slot entirely and
//!   borrows only from the shared queue, so a long wait can never pin the
//!   slot.
//!
//! Either way a lease is exclusively owned for the whole operation; the
//! strategies differ only in where the session is parked between uses.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use crate::engine::{Engine, EngineSession};
use crate::error::{KvError, Result};

/// How a session is borrowed for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BorrowStrategy {
    /// Operation expected to complete inline; parks in the hot slot
    /// between uses
    FastPath,
    /// Operation that routinely waits on a pending completion; shared
    /// queue only
    PooledPath,
}

/// Pool of engine sessions owned by one store instance
pub(crate) struct SessionPool {
    engine: std::sync::Arc<dyn Engine>,
    /// Single-entry fast slot for non-waiting operations
    hot: Mutex<Option<Box<dyn EngineSession>>>,
    /// Shared overflow pool for everything else
    shared: SegQueue<Box<dyn EngineSession>>,
    /// Once set, leases dispose their session instead of re-pooling it
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(engine: std::sync::Arc<dyn Engine>) -> Self {
        Self {
            engine,
            hot: Mutex::new(None),
            shared: SegQueue::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Borrow a session, creating one lazily if none is pooled.
    pub fn acquire(&self, strategy: BorrowStrategy) -> Result<SessionLease<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::StoreDisposed);
        }

        let pooled = match strategy {
            // try_lock: a contended hot slot is not worth waiting for when
            // the shared queue is lock-free anyway
            BorrowStrategy::FastPath => self
                .hot
                .try_lock()
                .and_then(|mut slot| slot.take())
                .or_else(|| self.shared.pop()),
            BorrowStrategy::PooledPath => self.shared.pop(),
        };

        let session = match pooled {
            Some(session) => session,
            None => self.engine.new_session().map_err(KvError::Engine)?,
        };

        Ok(SessionLease {
            pool: self,
            session: Some(session),
            strategy,
        })
    }

    fn release(&self, session: Box<dyn EngineSession>, strategy: BorrowStrategy) {
        if self.closed.load(Ordering::Acquire) {
            // Store is mid-disposal; this session missed the drain.
            drop(session);
            return;
        }

        if strategy == BorrowStrategy::FastPath {
            if let Some(mut slot) = self.hot.try_lock() {
                if slot.is_none() {
                    *slot = Some(session);
                    return;
                }
            }
        }
        self.shared.push(session);
    }

    /// Drain and dispose every pooled session, hot slot included. After
    /// this call no new session can be acquired.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(session) = self.hot.lock().take() {
            drop(session);
        }
        while let Some(session) = self.shared.pop() {
            drop(session);
        }
    }

    #[cfg(test)]
    pub fn pooled(&self) -> usize {
        self.shared.len() + usize::from(self.hot.lock().is_some())
    }
}

/// Exclusive borrow of a session for one operation
pub(crate) struct SessionLease<'a> {
    pool: &'a SessionPool,
    session: Option<Box<dyn EngineSession>>,
    strategy: BorrowStrategy,
}

impl Deref for SessionLease<'_> {
    type Target = dyn EngineSession;

    fn deref(&self) -> &Self::Target {
        self.session
            .as_deref()
            .expect("session lease already released")
    }
}

impl DerefMut for SessionLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .expect("session lease already released")
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session, self.strategy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEngine;
    use std::sync::Arc;

    fn pool() -> (Arc<MemoryEngine>, SessionPool) {
        let engine = Arc::new(MemoryEngine::new());
        let pool = SessionPool::new(Arc::clone(&engine) as Arc<dyn Engine>);
        (engine, pool)
    }

    #[test]
    fn sessions_are_reused_not_recreated() {
        let (engine, pool) = pool();

        drop(pool.acquire(BorrowStrategy::FastPath).unwrap());
        drop(pool.acquire(BorrowStrategy::FastPath).unwrap());
        drop(pool.acquire(BorrowStrategy::FastPath).unwrap());
        assert_eq!(engine.sessions_created(), 1);

        // A pooled-path borrow skips the hot slot, so it builds its own
        // session the first time around.
        drop(pool.acquire(BorrowStrategy::PooledPath).unwrap());
        assert_eq!(engine.sessions_created(), 2);
        drop(pool.acquire(BorrowStrategy::PooledPath).unwrap());
        assert_eq!(engine.sessions_created(), 2);
    }

    #[test]
    fn fast_path_parks_in_hot_slot() {
        let (_engine, pool) = pool();
        drop(pool.acquire(BorrowStrategy::FastPath).unwrap());
        assert!(pool.hot.lock().is_some());
        assert_eq!(pool.shared.len(), 0);
    }

    #[test]
    fn pooled_path_never_touches_hot_slot() {
        let (_engine, pool) = pool();
        drop(pool.acquire(BorrowStrategy::PooledPath).unwrap());
        assert!(pool.hot.lock().is_none());
        assert_eq!(pool.shared.len(), 1);
    }

    #[test]
    fn concurrent_acquire_hands_out_distinct_sessions() {
        let (engine, pool) = pool();

        let a = pool.acquire(BorrowStrategy::FastPath).unwrap();
        let b = pool.acquire(BorrowStrategy::FastPath).unwrap();
        assert_eq!(engine.sessions_created(), 2);
        drop(a);
        drop(b);
        assert_eq!(pool.pooled(), 2);
    }

    #[test]
    fn close_drains_all_sessions() {
        let (engine, pool) = pool();
        drop(pool.acquire(BorrowStrategy::FastPath).unwrap());
        drop(pool.acquire(BorrowStrategy::PooledPath).unwrap());

        pool.close();
        assert_eq!(pool.pooled(), 0);
        assert_eq!(engine.open_sessions(), 0);
        assert!(matches!(
            pool.acquire(BorrowStrategy::FastPath),
            Err(KvError::StoreDisposed)
        ));
    }

    #[test]
    fn late_release_after_close_disposes_session() {
        let (engine, pool) = pool();
        let lease = pool.acquire(BorrowStrategy::FastPath).unwrap();
        pool.close();
        drop(lease);
        assert_eq!(pool.pooled(), 0);
        assert_eq!(engine.open_sessions(), 0);
    }
}
