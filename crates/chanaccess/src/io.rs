// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! I/O request objects and their user notification traits.
//!
//! Read-notify and write-notify requests live until their response (or
//! cancellation). Subscriptions persist until canceled or their channel is
//! destroyed, and survive circuit loss: they are marked disconnected and
//! re-installed when the channel reconnects.
//!
//! Each kind has its own fixed-capacity pool. The [`IoTable`] maps ids to
//! pool slots; ids come from one wrapping counter that skips live ids.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::channel::ChannelId;
use crate::error::{Error, Result};
use crate::pool::{ObjectPool, PoolIndex, PoolStats};
use crate::protocol::{DbrType, Status};

/// I/O request id (ioid / subscription id on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IoId(pub u32);

impl fmt::Display for IoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "io{}", self.0)
    }
}

/// Event classes a subscription selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventMask(u16);

impl EventMask {
    pub const VALUE: EventMask = EventMask(0x1);
    pub const LOG: EventMask = EventMask(0x2);
    pub const ALARM: EventMask = EventMask(0x4);
    pub const PROPERTY: EventMask = EventMask(0x8);

    const ALL: u16 = 0xF;

    /// Validate raw mask bits: non-empty, no unknown classes.
    pub fn from_bits(bits: u16) -> Result<Self> {
        if bits == 0 || bits & !Self::ALL != 0 {
            return Err(Error::BadEventMask(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl Default for EventMask {
    fn default() -> Self {
        EventMask::VALUE | EventMask::ALARM
    }
}

// ============================================================================
// Notification traits
// ============================================================================

/// Completion of a read-notify request. Exactly one method runs, once.
pub trait ReadNotify: Send + Sync {
    fn completion(&self, dbr: DbrType, count: u32, data: &[u8]);

    fn exception(&self, status: Status, context: &str, dbr: DbrType, count: u32);
}

/// Completion of a write-notify request. Exactly one method runs, once.
pub trait WriteNotify: Send + Sync {
    fn completion(&self);

    fn exception(&self, status: Status, context: &str, dbr: DbrType, count: u32);
}

/// Subscription updates, in server arrival order.
pub trait StateNotify: Send + Sync {
    fn current(&self, dbr: DbrType, count: u32, data: &[u8]);

    fn exception(&self, status: Status, context: &str, dbr: DbrType, count: u32);
}

// ============================================================================
// Request records
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IoKind {
    Read,
    Write,
    Subscription,
}

/// Subscription installation state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Waiting for the channel to connect
    Pending,
    /// EVENT_ADD sent on the current circuit
    Installed,
    /// Circuit lost; re-installed on reconnect
    Disconnected,
}

pub(crate) struct ReadNotifyIo {
    pub(crate) id: IoId,
    pub(crate) channel: ChannelId,
    pub(crate) dbr: DbrType,
    pub(crate) count: u32,
    pub(crate) notify: Arc<dyn ReadNotify>,
}

pub(crate) struct WriteNotifyIo {
    pub(crate) id: IoId,
    pub(crate) channel: ChannelId,
    pub(crate) dbr: DbrType,
    pub(crate) count: u32,
    pub(crate) notify: Arc<dyn WriteNotify>,
}

pub(crate) struct Subscription {
    pub(crate) id: IoId,
    pub(crate) channel: ChannelId,
    pub(crate) dbr: DbrType,
    /// Count as requested; 0 asks for the native count.
    pub(crate) count: u32,
    /// Count sent in the installed EVENT_ADD.
    pub(crate) installed_count: u32,
    pub(crate) mask: EventMask,
    pub(crate) state: SubscriptionState,
    pub(crate) notify: Arc<dyn StateNotify>,
}

/// A removed request, owned by the caller of `destroy_io`.
pub(crate) enum IoRecord {
    Read(ReadNotifyIo),
    Write(WriteNotifyIo),
    Subscription(Subscription),
}

impl IoRecord {
    pub(crate) fn channel(&self) -> ChannelId {
        match self {
            IoRecord::Read(io) => io.channel,
            IoRecord::Write(io) => io.channel,
            IoRecord::Subscription(io) => io.channel,
        }
    }

    /// Public description of the request.
    pub(crate) fn describe(&self) -> IoRequest {
        match self {
            IoRecord::Read(io) => IoRequest {
                id: io.id,
                channel: io.channel,
                kind: IoKind::Read,
                dbr: io.dbr,
                count: io.count,
                mask: None,
            },
            IoRecord::Write(io) => IoRequest {
                id: io.id,
                channel: io.channel,
                kind: IoKind::Write,
                dbr: io.dbr,
                count: io.count,
                mask: None,
            },
            IoRecord::Subscription(io) => IoRequest {
                id: io.id,
                channel: io.channel,
                kind: IoKind::Subscription,
                dbr: io.dbr,
                count: io.count,
                mask: Some(io.mask),
            },
        }
    }
}

/// Description of an outstanding I/O request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoRequest {
    pub id: IoId,
    pub channel: ChannelId,
    pub kind: IoKind,
    pub dbr: DbrType,
    pub count: u32,
    pub mask: Option<EventMask>,
}

// ============================================================================
// IoTable
// ============================================================================

/// Global I/O index over the three per-kind pools.
pub(crate) struct IoTable {
    index: HashMap<IoId, (IoKind, PoolIndex)>,
    reads: ObjectPool<ReadNotifyIo>,
    writes: ObjectPool<WriteNotifyIo>,
    subscriptions: ObjectPool<Subscription>,
    next_id: u32,
}

impl IoTable {
    pub(crate) fn new(reads: usize, writes: usize, subscriptions: usize) -> Self {
        Self {
            index: HashMap::new(),
            reads: ObjectPool::new("read-notify", reads),
            writes: ObjectPool::new("write-notify", writes),
            subscriptions: ObjectPool::new("subscription", subscriptions),
            next_id: 1,
        }
    }

    fn next_free_id(&mut self) -> IoId {
        loop {
            let id = IoId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.index.contains_key(&id) {
                return id;
            }
        }
    }

    fn pool_full(&mut self, kind: IoKind) -> Option<Error> {
        match kind {
            IoKind::Read if self.reads.is_full() => Some(self.reads.exhausted()),
            IoKind::Write if self.writes.is_full() => Some(self.writes.exhausted()),
            IoKind::Subscription if self.subscriptions.is_full() => {
                Some(self.subscriptions.exhausted())
            }
            _ => None,
        }
    }

    pub(crate) fn insert_read(&mut self, build: impl FnOnce(IoId) -> ReadNotifyIo) -> Result<IoId> {
        if let Some(err) = self.pool_full(IoKind::Read) {
            return Err(err);
        }
        let id = self.next_free_id();
        let slot = self.reads.insert(build(id))?;
        self.index.insert(id, (IoKind::Read, slot));
        Ok(id)
    }

    pub(crate) fn insert_write(&mut self, build: impl FnOnce(IoId) -> WriteNotifyIo) -> Result<IoId> {
        if let Some(err) = self.pool_full(IoKind::Write) {
            return Err(err);
        }
        let id = self.next_free_id();
        let slot = self.writes.insert(build(id))?;
        self.index.insert(id, (IoKind::Write, slot));
        Ok(id)
    }

    pub(crate) fn insert_subscription(
        &mut self,
        build: impl FnOnce(IoId) -> Subscription,
    ) -> Result<IoId> {
        if let Some(err) = self.pool_full(IoKind::Subscription) {
            return Err(err);
        }
        let id = self.next_free_id();
        let slot = self.subscriptions.insert(build(id))?;
        self.index.insert(id, (IoKind::Subscription, slot));
        Ok(id)
    }

    /// Remove and recycle. `None` if the id is not live.
    pub(crate) fn remove(&mut self, id: IoId) -> Option<IoRecord> {
        let (kind, slot) = self.index.remove(&id)?;
        match kind {
            IoKind::Read => self.reads.remove(slot).map(IoRecord::Read),
            IoKind::Write => self.writes.remove(slot).map(IoRecord::Write),
            IoKind::Subscription => self.subscriptions.remove(slot).map(IoRecord::Subscription),
        }
    }

    pub(crate) fn kind(&self, id: IoId) -> Option<IoKind> {
        self.index.get(&id).map(|(kind, _)| *kind)
    }

    pub(crate) fn channel_of(&self, id: IoId) -> Option<ChannelId> {
        let (kind, slot) = *self.index.get(&id)?;
        match kind {
            IoKind::Read => self.reads.get(slot).map(|io| io.channel),
            IoKind::Write => self.writes.get(slot).map(|io| io.channel),
            IoKind::Subscription => self.subscriptions.get(slot).map(|io| io.channel),
        }
    }

    pub(crate) fn describe(&self, id: IoId) -> Option<IoRequest> {
        let (kind, slot) = *self.index.get(&id)?;
        let request = match kind {
            IoKind::Read => self.reads.get(slot).map(|io| IoRequest {
                id,
                channel: io.channel,
                kind,
                dbr: io.dbr,
                count: io.count,
                mask: None,
            }),
            IoKind::Write => self.writes.get(slot).map(|io| IoRequest {
                id,
                channel: io.channel,
                kind,
                dbr: io.dbr,
                count: io.count,
                mask: None,
            }),
            IoKind::Subscription => self.subscriptions.get(slot).map(|io| IoRequest {
                id,
                channel: io.channel,
                kind,
                dbr: io.dbr,
                count: io.count,
                mask: Some(io.mask),
            }),
        };
        request
    }

    pub(crate) fn subscription(&self, id: IoId) -> Option<&Subscription> {
        match self.index.get(&id)? {
            (IoKind::Subscription, slot) => self.subscriptions.get(*slot),
            _ => None,
        }
    }

    pub(crate) fn subscription_mut(&mut self, id: IoId) -> Option<&mut Subscription> {
        match self.index.get(&id)? {
            (IoKind::Subscription, slot) => self.subscriptions.get_mut(*slot),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = IoId> + '_ {
        self.index.keys().copied()
    }

    pub(crate) fn read_stats(&self) -> PoolStats {
        self.reads.stats()
    }

    pub(crate) fn write_stats(&self) -> PoolStats {
        self.writes.stats()
    }

    pub(crate) fn subscription_stats(&self) -> PoolStats {
        self.subscriptions.stats()
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&mut self, id: u32) {
        self.next_id = id.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRead;
    impl ReadNotify for NullRead {
        fn completion(&self, _: DbrType, _: u32, _: &[u8]) {}
        fn exception(&self, _: Status, _: &str, _: DbrType, _: u32) {}
    }

    fn read(id: IoId) -> ReadNotifyIo {
        ReadNotifyIo {
            id,
            channel: ChannelId(1),
            dbr: DbrType::DOUBLE,
            count: 1,
            notify: Arc::new(NullRead),
        }
    }

    #[test]
    fn test_event_mask_validation() {
        assert!(EventMask::from_bits(0).is_err());
        assert!(EventMask::from_bits(0x10).is_err());
        let mask = EventMask::from_bits(0x5).unwrap();
        assert!(mask.contains(EventMask::VALUE));
        assert!(mask.contains(EventMask::ALARM));
        assert!(!mask.contains(EventMask::LOG));
        assert_eq!(EventMask::default().bits(), 0x5);
    }

    #[test]
    fn test_ids_unique_across_kinds() {
        let mut table = IoTable::new(4, 4, 4);
        let a = table.insert_read(read).unwrap();
        let b = table.insert_read(read).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.kind(a), Some(IoKind::Read));
        assert_eq!(table.len(), 2);
        assert!(table.remove(a).is_some());
        assert!(table.remove(a).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_wrapped_counter_skips_live_id() {
        let mut table = IoTable::new(4, 4, 4);
        let first = table.insert_read(read).unwrap();
        table.set_next_id(first.0);
        let next = table.insert_read(read).unwrap();
        assert_ne!(next, first);
    }

    #[test]
    fn test_per_kind_capacity() {
        let mut table = IoTable::new(1, 1, 1);
        table.insert_read(read).unwrap();
        let err = table.insert_read(read).unwrap_err();
        assert!(matches!(err, Error::PoolExhausted("read-notify")));
        assert_eq!(table.read_stats().exhausted, 1);
        assert_eq!(table.len(), 1);
    }
}
