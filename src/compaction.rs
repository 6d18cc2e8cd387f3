//! Compaction scheduler
//!
//! A background control loop that decides *when* to ask the engine to
//! reclaim log space. The engine knows how to compact; this module owns the
//! policy: poll the log bounds on a cadence, compact when the safe-readonly
//! region outgrows a threshold, and adapt the threshold when compaction
//! stops making progress.
//!
//! ## State machine
//!
//! ```text
//! Idle → Waiting(cadence) → Evaluating → Skipping ──┐
//!            ▲                    │                  │
//!            │                    └──→ Compacting ───┤
//!            └───────────────────────────────────────┘
//!                     (cancellation → Stopped from any state)
//! ```
//!
//! The skip/compact/back-off policy lives in [`CompactionPolicy`], which is
//! pure and clock-free so it can be tested without timers. The thread loop
//! only drives it.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::config::CompactionTuning;
use crate::engine::{Engine, LogBounds};
use crate::error::Result;
use crate::pool::{BorrowStrategy, SessionPool};

// =============================================================================
// Policy
// =============================================================================

/// What one evaluation of the log bounds decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompactionDecision {
    /// Region below threshold; nothing to do this round
    Skip {
        region_bytes: u64,
    },
    /// Compact the oldest slice of the safe-readonly region
    Compact {
        until_address: u64,
        region_bytes: u64,
    },
}

/// Adaptive compaction policy
///
/// Owned and mutated exclusively by the scheduler thread; foreground
/// operations never see it. Invariant: `threshold_bytes > 0`.
#[derive(Debug)]
pub(crate) struct CompactionPolicy {
    threshold_bytes: u64,
    consecutive_compactions: u8,
    tuning: CompactionTuning,
}

impl CompactionPolicy {
    pub fn new(initial_threshold_bytes: u64, tuning: CompactionTuning) -> Self {
        debug_assert!(initial_threshold_bytes > 0);
        debug_assert!(tuning.compact_fraction > 0.0 && tuning.compact_fraction <= 1.0);
        debug_assert!(tuning.compactions_before_backoff >= 1);
        Self {
            threshold_bytes: initial_threshold_bytes.max(1),
            consecutive_compactions: 0,
            tuning,
        }
    }

    /// Evaluate one snapshot of the log bounds.
    pub fn evaluate(&self, bounds: LogBounds) -> CompactionDecision {
        let region_bytes = bounds.safe_read_only_region();
        if region_bytes < self.threshold_bytes {
            CompactionDecision::Skip { region_bytes }
        } else {
            let extent = (region_bytes as f64 * self.tuning.compact_fraction) as u64;
            CompactionDecision::Compact {
                until_address: bounds.begin_address + extent,
                region_bytes,
            }
        }
    }

    /// Record a skipped round: the consecutive-compaction streak is broken.
    pub fn record_skip(&mut self) {
        self.consecutive_compactions = 0;
    }

    /// Record a completed compaction. Returns the new threshold when the
    /// streak triggered a back-off doubling.
    ///
    /// The region size cannot simply be compared before/after to detect a
    /// no-op compaction: records shift from head to tail during compaction,
    /// so the region size moves by small amounts either way even when the
    /// log is already compact. Counting consecutive compactions is the
    /// reliable signal.
    pub fn record_compaction(&mut self) -> Option<u64> {
        self.consecutive_compactions += 1;
        if self.consecutive_compactions >= self.tuning.compactions_before_backoff {
            self.threshold_bytes *= 2;
            self.consecutive_compactions = 0;
            Some(self.threshold_bytes)
        } else {
            None
        }
    }

    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_bytes
    }

    #[cfg(test)]
    pub fn consecutive_compactions(&self) -> u8 {
        self.consecutive_compactions
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Condvar-backed cancellation signal: sleeping waiters wake promptly.
struct CancelSignal {
    canceled: Mutex<bool>,
    wake: Condvar,
}

impl CancelSignal {
    fn new() -> Self {
        Self {
            canceled: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn cancel(&self) {
        *self.canceled.lock() = true;
        self.wake.notify_all();
    }

    fn is_canceled(&self) -> bool {
        *self.canceled.lock()
    }

    /// Sleep for `duration` unless canceled. Returns true if canceled,
    /// whether before sleeping or mid-sleep.
    fn sleep(&self, duration: Duration) -> bool {
        let mut canceled = self.canceled.lock();
        if *canceled {
            return true;
        }
        self.wake.wait_for(&mut canceled, duration);
        *canceled
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Handle to the background compaction thread
///
/// `cancel` only signals; the thread exits on its own next wake. Dropping
/// the handle signals and joins.
pub(crate) struct CompactionScheduler {
    signal: Arc<CancelSignal>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CompactionScheduler {
    /// Spawn the scheduler loop.
    pub fn start(
        engine: Arc<dyn Engine>,
        sessions: Arc<SessionPool>,
        policy: CompactionPolicy,
        cadence: Duration,
    ) -> Self {
        let signal = Arc::new(CancelSignal::new());
        let loop_signal = Arc::clone(&signal);

        let thread = thread::Builder::new()
            .name("hybridkv-compaction".to_string())
            .spawn(move || {
                compaction_loop(engine, sessions, policy, cadence, loop_signal);
            })
            .expect("failed to spawn compaction thread");

        Self {
            signal,
            thread: Some(thread),
        }
    }

    /// Signal cancellation without waiting for the thread to exit.
    pub fn cancel(&self) {
        self.signal.cancel();
    }
}

impl Drop for CompactionScheduler {
    fn drop(&mut self) {
        self.signal.cancel();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Main scheduler loop, running on the background thread.
///
/// Failures never propagate out of here: a single failed compaction must
/// not take down the store, so errors are logged and the loop retries
/// after the next delay.
fn compaction_loop(
    engine: Arc<dyn Engine>,
    sessions: Arc<SessionPool>,
    mut policy: CompactionPolicy,
    cadence: Duration,
    signal: Arc<CancelSignal>,
) {
    debug!(
        cadence_ms = cadence.as_millis() as u64,
        threshold_bytes = policy.threshold_bytes(),
        "compaction scheduler started"
    );

    loop {
        if signal.sleep(cadence) {
            debug!("compaction scheduler stopped");
            return;
        }

        let bounds = engine.log_bounds();
        match policy.evaluate(bounds) {
            CompactionDecision::Skip { region_bytes } => {
                trace!(
                    region_bytes,
                    threshold_bytes = policy.threshold_bytes(),
                    "skipping log compaction"
                );
                policy.record_skip();
            }
            CompactionDecision::Compact {
                until_address,
                region_bytes,
            } => match compact(&sessions, until_address) {
                Ok(()) => {
                    trace!(
                        region_bytes_before = region_bytes,
                        region_bytes_after = engine.log_bounds().safe_read_only_region(),
                        "log compacted"
                    );
                    if let Some(new_threshold) = policy.record_compaction() {
                        trace!(
                            threshold_bytes = new_threshold,
                            "compaction threshold increased"
                        );
                    }
                }
                Err(error) => {
                    // Either compaction failed or the store is mid-disposal;
                    // in the latter case the cancellation signal ends the
                    // loop before the next attempt.
                    if signal.is_canceled() {
                        debug!("compaction scheduler stopped");
                        return;
                    }
                    warn!(%error, "log compaction attempt failed");
                }
            },
        }
    }
}

/// Run one compaction through a pooled session.
fn compact(sessions: &SessionPool, until_address: u64) -> Result<()> {
    let mut session = sessions.acquire(BorrowStrategy::PooledPath)?;
    session.compact_until(until_address, true)?;
    Ok(())
}
