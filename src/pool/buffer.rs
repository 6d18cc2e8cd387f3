//! Buffer writer pool
//!
//! Growable scratch buffers for encoding keys/values into one contiguous
//! region. Buffers are cleared (not deallocated) on release, so steady-state
//! operation performs no heap allocation for serialization.

use std::ops::{Deref, DerefMut};

use bytes::BytesMut;
use crossbeam::queue::SegQueue;

/// Initial capacity for freshly constructed scratch buffers
const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Lock-free pool of reusable scratch buffers
pub(crate) struct BufferPool {
    buffers: SegQueue<BytesMut>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            buffers: SegQueue::new(),
        }
    }

    /// Dequeue a cleared buffer, constructing one if the pool is empty.
    pub fn acquire(&self) -> BufferLease<'_> {
        let buf = self
            .buffers
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY));
        BufferLease {
            pool: self,
            buf: Some(buf),
        }
    }

    fn release(&self, mut buf: BytesMut) {
        buf.clear();
        self.buffers.push(buf);
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.buffers.len()
    }
}

/// Exclusive borrow of a pooled buffer, returned to the pool on drop
pub(crate) struct BufferLease<'a> {
    pool: &'a BufferPool,
    buf: Option<BytesMut>,
}

impl Deref for BufferLease<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer lease already released")
    }
}

impl DerefMut for BufferLease<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer lease already released")
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
