// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Id-keyed table over an [`ObjectPool`].
//!
//! Ids are handed out chronologically from a wrapping counter, skipping any
//! id that is still live, so an id is never reused while its entry exists.
//! Id 0 is never issued.

use std::collections::HashMap;

use crate::error::Result;
use crate::pool::{ObjectPool, PoolIndex, PoolStats};

#[derive(Debug)]
pub struct IdTable<T> {
    pool: ObjectPool<(u32, T)>,
    index: HashMap<u32, PoolIndex>,
    next_id: u32,
}

impl<T> IdTable<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            pool: ObjectPool::new(name, capacity),
            index: HashMap::with_capacity(capacity.min(1024)),
            next_id: 1,
        }
    }

    /// Next free id. Does not reserve it.
    fn next_free_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id == 0 {
                self.next_id = 1;
            }
            if !self.index.contains_key(&id) {
                return id;
            }
        }
    }

    /// Insert a value built from its freshly allocated id.
    pub fn insert_with(&mut self, build: impl FnOnce(u32) -> T) -> Result<u32> {
        if self.pool.is_full() {
            return Err(self.pool.exhausted());
        }
        let id = self.next_free_id();
        let slot = self.pool.insert((id, build(id)))?;
        self.index.insert(id, slot);
        Ok(id)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        let slot = self.index.remove(&id)?;
        self.pool.remove(slot).map(|(_, value)| value)
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        let slot = self.index.get(&id)?;
        self.pool.get(*slot).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        let slot = self.index.get(&id)?;
        self.pool.get_mut(*slot).map(|(_, value)| value)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.pool.iter().map(|(_, (id, _))| *id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.pool.iter().map(|(_, (id, value))| (*id, value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.pool.iter_mut().map(|(_, (id, value))| (*id, value))
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&mut self, id: u32) {
        self.next_id = id.max(1);
    }
}
