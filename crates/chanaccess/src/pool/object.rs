// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity typed object pool.
//!
//! Arena of slots plus a free index list. Slots are created lazily up to
//! the capacity and recycled afterwards, so steady-state operation does not
//! allocate. Callers serialize access (the context holds its primary lock).
//!
//! ```text
//! slots: [ A ][ - ][ C ][ - ]      free: [3, 1]
//!          0    1    2    3
//! ```

use crate::error::{Error, Result};

/// Index of an occupied slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolIndex(u32);

impl PoolIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Allocation counters of one pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub allocations: u64,
    pub releases: u64,
    pub high_water: usize,
    pub exhausted: u64,
}

/// Fixed-capacity arena with free-list recycling.
#[derive(Debug)]
pub struct ObjectPool<T> {
    name: &'static str,
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    capacity: usize,
    stats: PoolStats,
}

impl<T> ObjectPool<T> {
    /// Create an empty pool. `capacity` must fit in a `u32`.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        Self {
            name,
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            stats: PoolStats {
                capacity,
                ..PoolStats::default()
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Store `value`, returning its slot, or `PoolExhausted` when full.
    pub fn insert(&mut self, value: T) -> Result<PoolIndex> {
        let index = if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(value);
            index
        } else if self.slots.len() < self.capacity {
            self.slots.push(Some(value));
            (self.slots.len() - 1) as u32
        } else {
            return Err(self.exhausted());
        };

        self.stats.allocations += 1;
        self.stats.in_use += 1;
        self.stats.high_water = self.stats.high_water.max(self.stats.in_use);
        Ok(PoolIndex(index))
    }

    /// Record a failed allocation and build the matching error.
    pub fn exhausted(&mut self) -> Error {
        self.stats.exhausted += 1;
        log::debug!("[pool] {} exhausted (capacity {})", self.name, self.capacity);
        Error::PoolExhausted(self.name)
    }

    /// Release a slot, returning its value. `None` if the slot is free.
    pub fn remove(&mut self, index: PoolIndex) -> Option<T> {
        let value = self.slots.get_mut(index.as_usize())?.take()?;
        self.free.push(index.0);
        self.stats.releases += 1;
        self.stats.in_use -= 1;
        Some(value)
    }

    pub fn get(&self, index: PoolIndex) -> Option<&T> {
        self.slots.get(index.as_usize())?.as_ref()
    }

    pub fn get_mut(&mut self, index: PoolIndex) -> Option<&mut T> {
        self.slots.get_mut(index.as_usize())?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.stats.in_use
    }

    pub fn is_empty(&self) -> bool {
        self.stats.in_use == 0
    }

    pub fn is_full(&self) -> bool {
        self.stats.in_use >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (PoolIndex, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (PoolIndex(i as u32), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PoolIndex, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (PoolIndex(i as u32), v)))
    }
}
