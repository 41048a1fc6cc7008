//! Reusable read buffers.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};

/// Pool of byte buffers used for record reads.
///
/// Buffers return to the pool when their [`PooledBuffer`] guard drops.
/// Buffers that grew past `max_buffer_size` are released instead of kept.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    max_buffer_size: usize,
}

impl BufferPool {
    /// Default number of idle buffers retained.
    pub const DEFAULT_MAX_POOLED: usize = 32;
    /// Default capacity above which buffers are not retained.
    pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

    /// Creates a pool with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(Self::DEFAULT_MAX_POOLED, Self::DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Creates a pool with explicit limits.
    #[must_use]
    pub fn with_limits(max_pooled: usize, max_buffer_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_pooled,
            max_buffer_size,
        }
    }

    /// Takes a buffer from the pool, allocating if none is idle.
    pub fn lease(&self) -> PooledBuffer<'_> {
        let buf = self.free.lock().pop().unwrap_or_default();
        PooledBuffer {
            buf: Some(buf),
            pool: self,
        }
    }

    /// Number of idle buffers.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn give_back(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_buffer_size {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            buf.clear();
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer leased from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    buf: Option<Vec<u8>>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        // Only `None` during drop.
        self.buf.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_reused() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.lease();
            buf.extend_from_slice(&[1, 2, 3]);
        }
        assert_eq!(pool.idle(), 1);
        let buf = pool.lease();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 3);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn oversized_buffers_are_released() {
        let pool = BufferPool::with_limits(4, 8);
        {
            let mut buf = pool.lease();
            buf.resize(64, 0);
        }
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn idle_count_is_capped() {
        let pool = BufferPool::with_limits(1, 1024);
        let a = pool.lease();
        let b = pool.lease();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
