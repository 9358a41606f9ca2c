// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free receive buffer pool.
//!
//! Buffers are created on demand up to a fixed count and parked on a
//! crossbeam `ArrayQueue` when released. Receive threads acquire without
//! touching the context lock.

use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

struct Inner {
    freelist: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
    capacity: usize,
    created: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
    exhausted: AtomicU64,
}

/// Receive buffer counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub buffer_size: usize,
    pub capacity: usize,
    pub created: usize,
    pub available: usize,
    pub acquired: u64,
    pub released: u64,
    pub exhausted: u64,
}

/// Pool of equally sized byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    /// Pool of at most `capacity` buffers of `buffer_size` bytes.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                freelist: ArrayQueue::new(capacity.max(1)),
                buffer_size,
                capacity,
                created: AtomicUsize::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
            }),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Take a buffer, creating one if the pool has not reached capacity.
    ///
    /// Returns `None` when every buffer is checked out.
    pub fn acquire(&self) -> Option<PooledBuffer> {
        let inner = &self.inner;
        let buf = match inner.freelist.pop() {
            Some(buf) => buf,
            None => {
                let reserved = inner
                    .created
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < inner.capacity).then_some(n + 1)
                    })
                    .is_ok();
                if !reserved {
                    inner.exhausted.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                vec![0u8; inner.buffer_size]
            }
        };
        inner.acquired.fetch_add(1, Ordering::Relaxed);
        Some(PooledBuffer {
            buf: Some(buf),
            len: 0,
            pool: Arc::clone(&self.inner),
        })
    }

    pub fn stats(&self) -> BufferStats {
        let inner = &self.inner;
        BufferStats {
            buffer_size: inner.buffer_size,
            capacity: inner.capacity,
            created: inner.created.load(Ordering::Acquire),
            available: inner.freelist.len(),
            acquired: inner.acquired.load(Ordering::Relaxed),
            released: inner.released.load(Ordering::Relaxed),
            exhausted: inner.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Buffer on loan from a [`BufferPool`]; returned on drop.
///
/// Dereferences to the first `len` bytes, set with [`PooledBuffer::set_len`].
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    len: usize,
    pool: Arc<Inner>,
}

impl PooledBuffer {
    /// Set the logical length. Clamped to the buffer size.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.pool.buffer_size);
    }

    pub fn capacity(&self) -> usize {
        self.pool.buffer_size
    }

    /// Whole underlying buffer, regardless of the logical length.
    pub fn raw_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.buf {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        match &mut self.buf {
            Some(buf) => &mut buf[..len],
            None => &mut [],
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.released.fetch_add(1, Ordering::Relaxed);
            if self.pool.freelist.push(buf).is_err() {
                // Freelist can only overflow if capacity accounting is broken.
                log::warn!("[pool] receive buffer freelist full, dropping buffer");
            }
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("capacity", &self.pool.buffer_size)
            .finish()
    }
}
