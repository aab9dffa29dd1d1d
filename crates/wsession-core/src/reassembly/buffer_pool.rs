//! Pooled receive buffers
//!
//! Each receive loop rents one fixed-size scratch buffer for its lifetime.
//! The buffer goes back to the pool when the [`PooledBuffer`] is dropped, on
//! every exit path of the loop.

use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of idle buffers kept by a pool
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// A buffer rented from a [`BufferPool`]
pub struct PooledBuffer {
    data: Box<[u8]>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.give_back(data);
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("capacity", &self.capacity())
            .finish()
    }
}

struct PoolInner {
    idle: ArrayQueue<Box<[u8]>>,
    buffer_size: usize,
    allocated: AtomicUsize,
    in_use: AtomicUsize,
}

impl PoolInner {
    fn give_back(&self, data: Box<[u8]>) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        // Full pool: let the buffer go
        let _ = self.idle.push(data);
    }
}

/// Lock-free pool of equally sized buffers
///
/// Renting never fails: when no idle buffer is left a new one is allocated.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool handing out `buffer_size`-byte buffers and keeping at
    /// most `capacity` of them idle
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: ArrayQueue::new(capacity.max(1)),
                buffer_size,
                allocated: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a buffer out of the pool
    pub fn rent(&self) -> PooledBuffer {
        let data = self.inner.idle.pop().unwrap_or_else(|| {
            self.inner.allocated.fetch_add(1, Ordering::Relaxed);
            vec![0u8; self.inner.buffer_size].into_boxed_slice()
        });
        self.inner.in_use.fetch_add(1, Ordering::Relaxed);

        PooledBuffer {
            data,
            pool: self.inner.clone(),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Buffers currently rented out
    pub fn outstanding(&self) -> usize {
        self.inner.in_use.load(Ordering::Relaxed)
    }

    /// Buffers waiting in the pool
    pub fn idle(&self) -> usize {
        self.inner.idle.len()
    }

    /// Buffers allocated over the pool's lifetime
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size())
            .field("outstanding", &self.outstanding())
            .field("idle", &self.idle())
            .finish()
    }
}
