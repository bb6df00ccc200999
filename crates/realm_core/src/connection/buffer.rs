//! Pooled write buffers for the datagram path.
//!
//! Every `send_to` copies its payload into a buffer borrowed from a
//! [`WriteBufferPool`]. The buffer goes back to the pool when the
//! [`WriteBuffer`] is dropped, whether the send succeeded or not, so steady-state
//! traffic does not allocate.

use crossbeam::queue::ArrayQueue;
use std::ops::Deref;
use std::sync::Arc;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Lock-free pool of reusable byte buffers.
#[derive(Debug)]
pub struct WriteBufferPool {
    free: ArrayQueue<Vec<u8>>,
}

impl WriteBufferPool {
    /// Creates a pool retaining at most `capacity` idle buffers.
    ///
    /// Borrowing never blocks: when the pool is empty a fresh buffer is
    /// allocated, and buffers returned to a full pool are freed.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(capacity.max(1)),
        })
    }

    /// Borrows a buffer holding a copy of `payload`.
    pub fn acquire(self: &Arc<Self>, payload: &[u8]) -> WriteBuffer {
        let mut data = self.free.pop().unwrap_or_default();
        data.extend_from_slice(payload);
        WriteBuffer {
            data,
            pool: Arc::clone(self),
        }
    }

    /// Number of idle buffers.
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

/// A buffer on loan from a [`WriteBufferPool`].
#[derive(Debug)]
pub struct WriteBuffer {
    data: Vec<u8>,
    pool: Arc<WriteBufferPool>,
}

impl Deref for WriteBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Drop for WriteBuffer {
    fn drop(&mut self) {
        let mut data = std::mem::take(&mut self.data);
        data.clear();
        // A full pool simply frees the buffer.
        let _ = self.pool.free.push(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_returns_to_pool_on_drop() {
        let pool = WriteBufferPool::new(2);
        assert_eq!(pool.available(), 0);

        let buffer = pool.acquire(b"hello");
        assert_eq!(&*buffer, b"hello");
        drop(buffer);
        assert_eq!(pool.available(), 1);

        let reused = pool.acquire(b"hi");
        assert_eq!(&*reused, b"hi");
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_full_pool_drops_extra_buffers() {
        let pool = WriteBufferPool::new(1);
        let a = pool.acquire(b"a");
        let b = pool.acquire(b"b");
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 1);
    }
}
