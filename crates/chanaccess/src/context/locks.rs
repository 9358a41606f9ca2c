// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The context's two shared-state locks.
//!
//! - primary: guards every table and membership; never held while user
//!   code runs
//! - callback: serializes callback delivery; reentrant so a callback can
//!   call back into the context
//!
//! Order: callback before primary. Acquiring the callback lock while the
//! same thread holds primary is counted as a violation and trips a debug
//! assertion.

use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::Instant;

pub(crate) struct Locks<T> {
    primary: Mutex<T>,
    callback: ReentrantMutex<()>,
    /// Thread currently holding `primary`. Leaf lock.
    primary_holder: Mutex<Option<ThreadId>>,
    violations: AtomicU64,
}

impl<T> Locks<T> {
    pub(crate) fn new(state: T) -> Self {
        Self {
            primary: Mutex::new(state),
            callback: ReentrantMutex::new(()),
            primary_holder: Mutex::new(None),
            violations: AtomicU64::new(0),
        }
    }

    pub(crate) fn primary(&self) -> PrimaryGuard<'_, T> {
        let guard = self.primary.lock();
        *self.primary_holder.lock() = Some(thread::current().id());
        PrimaryGuard {
            guard,
            holder: &self.primary_holder,
        }
    }

    pub(crate) fn callback(&self) -> ReentrantMutexGuard<'_, ()> {
        if self.holds_primary() {
            self.violations.fetch_add(1, Ordering::Relaxed);
            log::error!("[locks] callback lock requested while holding primary lock");
            debug_assert!(false, "lock order violation: callback after primary");
        }
        self.callback.lock()
    }

    /// Whether the current thread is inside callback delivery.
    pub(crate) fn in_callback(&self) -> bool {
        self.callback.is_owned_by_current_thread()
    }

    pub(crate) fn holds_primary(&self) -> bool {
        *self.primary_holder.lock() == Some(thread::current().id())
    }

    pub(crate) fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }
}

/// Primary lock guard that keeps the holder record current.
pub(crate) struct PrimaryGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    holder: &'a Mutex<Option<ThreadId>>,
}

impl<T> PrimaryGuard<'_, T> {
    /// Run `f` with the primary lock released, then reacquire it.
    pub(crate) fn unlocked<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce() -> U,
    {
        *self.holder.lock() = None;
        let result = MutexGuard::unlocked(&mut self.guard, f);
        *self.holder.lock() = Some(thread::current().id());
        result
    }

    /// Wait on `cv` until notified or `deadline`. Returns true on timeout.
    pub(crate) fn wait_until(&mut self, cv: &Condvar, deadline: Instant) -> bool {
        *self.holder.lock() = None;
        let timed_out = cv.wait_until(&mut self.guard, deadline).timed_out();
        *self.holder.lock() = Some(thread::current().id());
        timed_out
    }
}

impl<T> Deref for PrimaryGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for PrimaryGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for PrimaryGuard<'_, T> {
    fn drop(&mut self) {
        *self.holder.lock() = None;
    }
}
