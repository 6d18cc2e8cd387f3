//! # hybridkv
//!
//! A concurrency-safe, typed key/value layer over a hybrid log-structured
//! storage engine, with:
//! - Zero-copy binary serialization of arbitrary serde types
//! - Pooled engine sessions and scratch buffers (lock-free, no global lock)
//! - A self-tuning background compaction scheduler
//! - Ordered, idempotent disposal of engine resources
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     KvStore<K, V>                           │
//! │              (upsert / delete / read / close)               │
//! └──────┬──────────────────┬──────────────────┬────────────────┘
//!        │                  │                  │
//!        ▼                  ▼                  ▼
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │ BinaryCodec │    │ BufferPool  │    │ SessionPool │◄──┐
//! │  (serde +   │───►│ (BytesMut   │    │ (hot slot + │   │
//! │   bincode)  │    │  scratch)   │    │  SegQueue)  │   │
//! └─────────────┘    └─────────────┘    └──────┬──────┘   │
//!                                              │          │
//!                                              ▼          │
//!                                    ┌──────────────────┐ │ ┌────────────┐
//!                                    │  dyn Engine      │ │ │ Compaction │
//!                                    │  (hybrid log,    │ └─│ Scheduler  │
//!                                    │   external)      │   │ (thread)   │
//!                                    └──────────────────┘   └────────────┘
//! ```
//!
//! The engine — hash index, in-memory/on-disk log regions, page eviction,
//! recovery — is an external collaborator behind the [`engine`] traits.
//! [`memory::MemoryEngine`] is the in-tree implementation used for tests,
//! benchmarks, and non-durable embedding.
//!
//! ## Example
//!
//! ```
//! use hybridkv::{KvStore, MemoryEngine, Status, StoreOptions};
//!
//! let options = StoreOptions::builder()
//!     .time_between_compactions_ms(-1) // no background compaction
//!     .build();
//! let store: KvStore<String, u64> = KvStore::open::<MemoryEngine>(options).unwrap();
//!
//! store.upsert(&"answer".to_string(), &42).unwrap();
//! let (status, value) = store.read(&"answer".to_string()).unwrap();
//! assert_eq!((status, value), (Status::Ok, Some(42)));
//!
//! store.close().unwrap();
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;

mod compaction;
mod pool;
mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use codec::BinaryCodec;
pub use config::{CodecOptions, CompactionTuning, StoreOptions, StoreOptionsBuilder};
pub use engine::{Engine, EngineError, EngineSession, LogBounds, Status};
pub use error::{KvError, Result};
pub use memory::MemoryEngine;
pub use store::KvStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of hybridkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
