//! Error types for hybridkv
//!
//! Provides a unified error type for all store operations.

use thiserror::Error;

use crate::engine::EngineError;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for store operations
#[derive(Debug, Error)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    /// The store has been disposed; no further operations are possible.
    ///
    /// Surfaced by every public operation invoked after `close`. Never
    /// retried internally: engine handles are invalid post-disposal.
    #[error("store has been disposed")]
    StoreDisposed,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    /// Encoding a key/value failed, or the engine returned malformed bytes.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    /// A failure reported by the underlying storage engine.
    ///
    /// Propagated unchanged for foreground operations. The compaction
    /// scheduler catches these itself and retries after the next delay.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}
