//! Fixed-size buffer pools with move-only buffer handles.
//!
//! A [`BufferPool`] hands out [`PooledBuffer`]s without blocking. Dropping a
//! buffer returns its memory to the free list of the pool it came from, so
//! ownership moving capture loop → queue → consumer is all the bookkeeping
//! there is.

use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("{pool} pool exhausted ({max_buffers} buffers in flight)")]
    Exhausted { pool: String, max_buffers: usize },

    #[error("{pool} pool is not active")]
    Inactive { pool: String },
}

struct PoolShared {
    name: String,
    buffer_size: usize,
    max_buffers: usize,
    free: ArrayQueue<Vec<u8>>,
    allocated: AtomicUsize,
    active: AtomicBool,
}

impl PoolShared {
    fn release(&self, data: Vec<u8>) {
        if self.active.load(Ordering::Acquire) {
            if let Err(data) = self.free.push(data) {
                drop(data);
                self.allocated.fetch_sub(1, Ordering::AcqRel);
            }
        } else {
            drop(data);
            self.allocated.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Pool of equally sized byte buffers with an upper bound on buffers in flight.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new<S: Into<String>>(name: S, buffer_size: usize, max_buffers: usize) -> Self {
        let max_buffers = max_buffers.max(1);
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                buffer_size,
                max_buffers,
                free: ArrayQueue::new(max_buffers),
                allocated: AtomicUsize::new(0),
                active: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    pub fn max_buffers(&self) -> usize {
        self.shared.max_buffers
    }

    /// Buffers currently allocated, free or in flight.
    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Activating lets buffers be acquired; deactivating frees the idle memory.
    pub fn set_active(&self, active: bool) {
        self.shared.active.store(active, Ordering::Release);
        if !active {
            let mut freed = 0;
            while let Some(data) = self.shared.free.pop() {
                drop(data);
                self.shared.allocated.fetch_sub(1, Ordering::AcqRel);
                freed += 1;
            }
            debug!("Deactivated {} pool, freed {} idle buffers", self.shared.name, freed);
        } else {
            debug!(
                "Activated {} pool: {} buffers of {} bytes",
                self.shared.name, self.shared.max_buffers, self.shared.buffer_size
            );
        }
    }

    /// Take a buffer without blocking.
    pub fn acquire(&self) -> Result<PooledBuffer, PoolError> {
        if !self.is_active() {
            return Err(PoolError::Inactive {
                pool: self.shared.name.clone(),
            });
        }

        let data = match self.shared.free.pop() {
            Some(data) => data,
            None => {
                let reserved = self.shared.allocated.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |n| (n < self.shared.max_buffers).then_some(n + 1),
                );
                if reserved.is_err() {
                    return Err(PoolError::Exhausted {
                        pool: self.shared.name.clone(),
                        max_buffers: self.shared.max_buffers,
                    });
                }
                trace!("Allocating new {} buffer", self.shared.name);
                vec![0u8; self.shared.buffer_size]
            }
        };

        let len = data.len();
        Ok(PooledBuffer {
            data: Some(data),
            offset: 0,
            len,
            filled: len,
            pool: Arc::downgrade(&self.shared),
        })
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.shared.name)
            .field("buffer_size", &self.shared.buffer_size)
            .field("max_buffers", &self.shared.max_buffers)
            .field("allocated", &self.allocated())
            .finish()
    }
}

/// Buffer checked out of a [`BufferPool`]; returns itself to the pool on drop.
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    offset: usize,
    len: usize,
    // Bytes written by the last transfer; regions never reach past it
    filled: usize,
    pool: Weak<PoolShared>,
}

impl PooledBuffer {
    /// Full backing storage, used as the destination of a transfer.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        match self.data.as_mut() {
            Some(data) => data.as_mut_slice(),
            None => &mut [],
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Limit the visible bytes to the first `len` bytes of the storage.
    pub fn set_size(&mut self, len: usize) {
        self.offset = 0;
        self.len = len.min(self.capacity());
        self.filled = self.len;
    }

    /// Limit the visible bytes to `len` bytes starting at `offset`, within
    /// the bytes kept by the last `set_size`.
    pub fn set_region(&mut self, offset: usize, len: usize) {
        self.offset = offset.min(self.filled);
        self.len = len.min(self.filled - self.offset);
    }

    pub fn region(&self) -> (usize, usize) {
        (self.offset, self.len)
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self.data.as_ref() {
            Some(data) => &data[self.offset..self.offset + self.len],
            None => &[],
        }
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        let (offset, len) = (self.offset, self.len);
        match self.data.as_mut() {
            Some(data) => &mut data[offset..offset + len],
            None => &mut [],
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.release(data);
            }
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
