//! Abstract storage engine interface
//!
//! The store is an adaptation layer over a hybrid log-structured key/value
//! engine: an in-memory mutable region, an on-disk append-only region, a hash
//! index, and crash-safe page eviction. None of that lives in this crate.
//! Everything the store needs from the engine is expressed by the traits in
//! this module, so any engine with sessions and a log accessor can sit behind
//! the facade ([`MemoryEngine`](crate::memory::MemoryEngine) is the in-tree
//! implementation used by tests and benchmarks).
//!
//! ## Sessions
//!
//! Engines hand out stateful access handles ("sessions"). A session is not
//! safe for two concurrent users — that exclusivity is encoded here through
//! `&mut self` methods — but it is expensive to construct, which is why the
//! store pools them instead of creating one per call.
//!
//! ## Pending operations
//!
//! An engine call may complete immediately or go pending on I/O. That split
//! is explicit in the types: [`Step::Done`] carries the result, while
//! [`Step::Pending`] carries a [`Completion`] the caller must wait on.

use std::path::PathBuf;

use bytes::Bytes;
use thiserror::Error;

/// Result type for engine-facing calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

// =============================================================================
// Errors
// =============================================================================

/// Failures reported by an engine implementation
#[derive(Debug, Error)]
pub enum EngineError {
    /// Device or file I/O failed
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine has already been disposed
    #[error("engine is closed")]
    Closed,

    /// The engine refused the operation
    #[error("engine rejected operation: {0}")]
    Rejected(String),

    /// Disposal was attempted while sessions were still open
    #[error("engine disposed with {0} session(s) still open")]
    SessionsOpen(usize),
}

// =============================================================================
// Operation Results
// =============================================================================

/// Outcome of an engine operation, passed through to callers unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation succeeded
    Ok,
    /// The key does not exist
    NotFound,
    /// The engine reported a failure for this record
    Error,
}

/// An engine call that either completed inline or went pending on I/O
pub enum Step<T> {
    /// Completed synchronously
    Done(T),
    /// Pending; wait on the completion to obtain the result
    Pending(Completion<T>),
}

impl<T> Step<T> {
    /// Resolve the step, blocking on the completion if the engine reported
    /// pending.
    pub fn resolve(self) -> EngineResult<T> {
        match self {
            Step::Done(value) => Ok(value),
            Step::Pending(completion) => completion.wait(),
        }
    }
}

/// Handle to a pending engine operation
pub struct Completion<T>(Box<dyn FnOnce() -> EngineResult<T> + Send>);

impl<T> Completion<T> {
    /// Wrap a wait function produced by the engine.
    pub fn new(wait: impl FnOnce() -> EngineResult<T> + Send + 'static) -> Self {
        Self(Box::new(wait))
    }

    /// Block until the pending operation finishes.
    pub fn wait(self) -> EngineResult<T> {
        (self.0)()
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Completion(..)")
    }
}

/// Result of a point read
#[derive(Debug)]
pub struct ReadResult {
    /// Engine status for the lookup
    pub status: Status,
    /// Value bytes when `status` is [`Status::Ok`]
    pub payload: Option<EngineBuffer>,
}

/// Engine-owned bytes backing a read result
///
/// The memory behind the payload belongs to the engine and is only valid
/// until released. Callers must finish decoding before calling [`release`];
/// dropping the buffer releases it as well, so the memory can never leak,
/// but the explicit call keeps the decode-then-release ordering visible at
/// the call site.
///
/// [`release`]: EngineBuffer::release
pub struct EngineBuffer {
    bytes: Bytes,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl EngineBuffer {
    /// Wrap payload bytes with no release hook.
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes, on_release: None }
    }

    /// Wrap payload bytes with a hook run exactly once on release.
    pub fn with_release(bytes: Bytes, on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            bytes,
            on_release: Some(Box::new(on_release)),
        }
    }

    /// View the payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Hand the backing memory back to the engine.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl Drop for EngineBuffer {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for EngineBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuffer")
            .field("len", &self.bytes.len())
            .finish()
    }
}

// =============================================================================
// Log Addresses
// =============================================================================

/// Snapshot of the engine's log addresses
///
/// Addresses are monotonically non-decreasing:
/// `begin_address <= safe_read_only_address <= tail_address`. The region
/// between begin and safe-readonly holds the oldest records eligible for
/// compaction; the tail is the write frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogBounds {
    /// Oldest retained record
    pub begin_address: u64,
    /// Boundary of the in-place-updatable region
    pub safe_read_only_address: u64,
    /// Write frontier
    pub tail_address: u64,
}

impl LogBounds {
    /// Size in bytes of the safe-readonly region, the sole input to
    /// compaction decisions.
    pub fn safe_read_only_region(&self) -> u64 {
        self.safe_read_only_address.saturating_sub(self.begin_address)
    }
}

// =============================================================================
// Engine Traits
// =============================================================================

/// A stateful engine access handle
///
/// Exactly one concurrent user at a time; the `&mut self` receivers make
/// that a compile-time guarantee. Key and value slices are only borrowed
/// for the duration of the call — an implementation must copy anything it
/// needs to keep.
pub trait EngineSession: Send {
    /// Insert or overwrite a record.
    fn upsert(&mut self, key: &[u8], value: &[u8]) -> EngineResult<Step<Status>>;

    /// Remove a record. Returns [`Status::NotFound`] if the key was absent.
    fn delete(&mut self, key: &[u8]) -> EngineResult<Status>;

    /// Point-read a record.
    fn read(&mut self, key: &[u8]) -> EngineResult<Step<ReadResult>>;

    /// Compact the log up to `address`, optionally shifting the begin
    /// address forward to reclaim the space.
    fn compact_until(&mut self, address: u64, shift_begin_address: bool) -> EngineResult<()>;
}

/// The engine itself: a session factory plus log introspection
pub trait Engine: Send + Sync {
    /// Create a fresh session. Material construction cost; callers should
    /// pool the result.
    fn new_session(&self) -> EngineResult<Box<dyn EngineSession>>;

    /// Snapshot the current log addresses.
    fn log_bounds(&self) -> LogBounds;

    /// Tear down engine resources. Only valid once all sessions have been
    /// disposed. Must be idempotent.
    fn dispose(&self) -> EngineResult<()>;
}

// =============================================================================
// Engine Construction
// =============================================================================

/// Settings handed to an engine opened by the store
///
/// Derived from [`StoreOptions`](crate::StoreOptions); ignored when the
/// caller supplies an already-constructed engine.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Full path of the primary log file
    pub log_path: PathBuf,
    /// Number of 64-bit buckets in the engine's hash index
    pub index_bucket_count: u64,
    /// Log page size as a power of two
    pub page_size_bits: u8,
    /// In-memory log region size as a power of two
    pub memory_size_bits: u8,
    /// On-disk segment size as a power of two
    pub segment_size_bits: u8,
    /// Delete log files when the device is disposed
    pub delete_on_close: bool,
}

/// An engine the store can construct internally from [`LogSettings`]
pub trait OpenEngine: Engine + Sized {
    /// Device handle returned alongside the engine
    type Device: LogDevice + 'static;

    /// Open the engine. The returned device is owned by the store and
    /// disposed after the engine during store disposal.
    fn open(settings: &LogSettings) -> EngineResult<(Self, Self::Device)>;
}

/// A store-owned device/file handle
///
/// Engines typically do not dispose their own log device, so the store
/// holds it and disposes it last.
pub trait LogDevice: Send {
    /// Close the device, deleting log files if configured to.
    fn dispose(&mut self) -> EngineResult<()>;
}
