// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Recycling pools: typed object arenas and receive buffers.

pub mod buffer;
pub mod object;

pub use buffer::{BufferPool, BufferStats, PooledBuffer};
pub use object::{ObjectPool, PoolIndex, PoolStats};

use crate::config::{ClientConfig, SMALL_BUFFER_SIZE};
use crate::error::{Error, Result};

/// Small and large receive buffer classes shared by all circuits.
#[derive(Clone)]
pub struct ReceiveBuffers {
    small: BufferPool,
    large: BufferPool,
    max_receive: usize,
}

impl ReceiveBuffers {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            small: BufferPool::new(config.small_buffer_count, SMALL_BUFFER_SIZE),
            large: BufferPool::new(config.large_buffer_count, config.large_buffer_size()),
            max_receive: config.max_receive_size(),
        }
    }

    /// Largest body accepted.
    pub fn max_receive(&self) -> usize {
        self.max_receive
    }

    /// Buffer able to hold `len` bytes, logical length set to `len`.
    ///
    /// `TooLarge` when `len` exceeds the receive limit, `PoolExhausted` when
    /// the size class has no free buffer.
    pub fn acquire_for(&self, len: usize) -> Result<PooledBuffer> {
        if len > self.max_receive {
            return Err(Error::TooLarge {
                bytes: len,
                limit: self.max_receive,
            });
        }
        let (pool, name) = if len <= self.small.buffer_size() {
            (&self.small, "small receive buffer")
        } else {
            (&self.large, "large receive buffer")
        };
        let mut buf = pool.acquire().ok_or(Error::PoolExhausted(name))?;
        buf.set_len(len);
        Ok(buf)
    }

    pub fn small_stats(&self) -> BufferStats {
        self.small.stats()
    }

    pub fn large_stats(&self) -> BufferStats {
        self.large.stats()
    }
}
