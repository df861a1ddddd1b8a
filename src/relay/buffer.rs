//! Reusable chunk buffers
//!
//! Each request decodes its chunk into a buffer taken from a bounded free
//! list. Buffers go back on drop (decode failure, dropped connection) or via
//! [`BufferPool::recycle`] once the forwarded bytes are uniquely owned again.

use crate::metrics;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

/// Bounded free list of chunk buffers
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<BytesMut>>,
    max_idle: usize,
    max_capacity: usize,
}

impl BufferPool {
    /// Create a pool keeping at most `max_idle` buffers of up to twice
    /// `max_chunk_size` capacity each.
    pub fn new(max_idle: usize, max_chunk_size: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            max_capacity: max_chunk_size.saturating_mul(2),
        }
    }

    /// Take a buffer, allocating if the pool is empty.
    ///
    /// `size_hint` sizes fresh allocations (usually the declared chunk size);
    /// it is capped by the pool's ceiling.
    pub fn acquire(&self, size_hint: usize) -> PooledBuffer<'_> {
        let reused = self.idle.lock().pop();
        let buf = match reused {
            Some(mut buf) => {
                metrics::record_buffer_pool(true);
                if buf.capacity() < size_hint {
                    buf.reserve(size_hint.min(self.max_capacity / 2));
                }
                buf
            }
            None => {
                metrics::record_buffer_pool(false);
                BytesMut::with_capacity(size_hint.min(self.max_capacity / 2))
            }
        };

        PooledBuffer {
            buf: Some(buf),
            pool: self,
        }
    }

    /// Return forwarded bytes to the pool if no other reference remains
    pub fn recycle(&self, bytes: Bytes) {
        if let Ok(buf) = bytes.try_into_mut() {
            self.put(buf);
        }
    }

    /// Number of idle buffers currently held
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Total capacity of the idle buffers, in bytes
    pub fn idle_bytes(&self) -> usize {
        self.idle.lock().iter().map(BytesMut::capacity).sum()
    }

    fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_capacity {
            return;
        }
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    buf: Option<BytesMut>,
    pool: &'a BufferPool,
}

impl PooledBuffer<'_> {
    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        if let Some(buf) = self.buf.as_mut() {
            buf.extend_from_slice(data);
        }
    }

    /// Detach the contents. The pool gets the storage back through
    /// [`BufferPool::recycle`].
    pub fn freeze(mut self) -> Bytes {
        self.buf.take().map(BytesMut::freeze).unwrap_or_default()
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}
