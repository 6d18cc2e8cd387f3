//! Object pools for per-operation resources
//!
//! Every foreground operation needs two things that are wasteful to create
//! per call: a scratch buffer for serialization and an engine session. Both
//! follow the same acquire/release protocol — try-dequeue from a lock-free
//! queue, construct on empty, return when the operation completes — wrapped
//! in RAII leases so release happens on every path, error paths included.

pub(crate) mod buffer;
pub(crate) mod session;

pub(crate) use buffer::BufferPool;
pub(crate) use session::{BorrowStrategy, SessionPool};
