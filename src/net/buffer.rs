//! Pooled buffer allocation for connection I/O.
//!
//! # Responsibilities
//! - Define the allocator contract shared by the listening socket and every
//!   per-connection channel
//! - Provide a freelist-backed default implementation for worker processes
//!   that do not bring their own pool

use std::sync::Mutex;

use bytes::BytesMut;

/// Pooled buffer allocator shared by the parent listening socket and every
/// accepted connection.
///
/// Implementations must be safe for concurrent acquisition from multiple
/// worker threads simultaneously.
pub trait BufferAllocator: Send + Sync {
    /// Hand out a cleared buffer with at least `capacity` bytes available.
    fn acquire(&self, capacity: usize) -> BytesMut;

    /// Return a buffer to the pool for reuse.
    fn recycle(&self, buf: BytesMut);
}

/// Freelist allocator over fixed-size chunks.
///
/// Buffers smaller than the chunk size are rounded up so recycled buffers are
/// interchangeable. The freelist is bounded; surplus buffers are dropped and
/// returned to the global allocator.
pub struct PooledBufferAllocator {
    chunk_size: usize,
    max_pooled: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl PooledBufferAllocator {
    pub fn new(chunk_size: usize, max_pooled: usize) -> Self {
        Self {
            chunk_size,
            max_pooled,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Number of buffers currently sitting in the freelist.
    pub fn pooled(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

impl Default for PooledBufferAllocator {
    fn default() -> Self {
        // 64 KiB chunks, at most 1024 pooled (64 MiB ceiling)
        Self::new(64 * 1024, 1024)
    }
}

impl BufferAllocator for PooledBufferAllocator {
    fn acquire(&self, capacity: usize) -> BytesMut {
        if capacity <= self.chunk_size {
            if let Ok(mut free) = self.free.lock() {
                if let Some(mut buf) = free.pop() {
                    buf.clear();
                    return buf;
                }
            }
            return BytesMut::with_capacity(self.chunk_size);
        }
        BytesMut::with_capacity(capacity)
    }

    fn recycle(&self, buf: BytesMut) {
        if buf.capacity() < self.chunk_size {
            return;
        }
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.max_pooled {
                free.push(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_rounds_up_to_chunk_size() {
        let pool = PooledBufferAllocator::new(4096, 8);
        let buf = pool.acquire(100);
        assert!(buf.capacity() >= 4096);
    }

    #[test]
    fn recycled_buffers_are_reused() {
        let pool = PooledBufferAllocator::new(4096, 8);
        let mut buf = pool.acquire(4096);
        buf.extend_from_slice(b"leftover");
        pool.recycle(buf);
        assert_eq!(pool.pooled(), 1);

        let buf = pool.acquire(1024);
        assert_eq!(pool.pooled(), 0);
        assert!(buf.is_empty(), "recycled buffer must come back cleared");
    }

    #[test]
    fn freelist_is_bounded() {
        let pool = PooledBufferAllocator::new(1024, 2);
        for _ in 0..4 {
            pool.recycle(BytesMut::with_capacity(1024));
        }
        assert_eq!(pool.pooled(), 2);
    }

    #[test]
    fn oversized_buffers_are_still_recyclable() {
        let pool = PooledBufferAllocator::new(1024, 2);
        let buf = pool.acquire(10_000);
        assert!(buf.capacity() >= 10_000);
        pool.recycle(buf);
        assert_eq!(pool.pooled(), 1);
    }
}
