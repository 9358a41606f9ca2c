// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synchronous groups.
//!
//! A group collects read-notify and write-notify requests issued through
//! it and lets a thread block until all of them completed. Each member
//! keeps its own status; [`GroupStatus`] summarizes them.
//!
//! Completions arrive on receive threads and update the group under the
//! primary lock, then wake blocked threads through the context's group
//! condition variable. `reset` and `delete` detach in-flight members
//! without canceling their requests: late completions carry an old
//! generation number and are dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::channel::ChannelId;
use crate::context::ContextCore;
use crate::error::{Error, Result};
use crate::io::{IoId, IoKind, ReadNotify, WriteNotify};
use crate::protocol::{DbrType, Status};

/// Synchronous group handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sg{}", self.0)
    }
}

/// Outcome of one member request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberStatus {
    Pending,
    Completed,
    Failed(Status),
}

/// Aggregate outcome of a completed group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupStatus {
    /// Every member succeeded (or the group is empty)
    Complete,
    PartialFailure { failed: usize, succeeded: usize },
    /// Every member failed
    Failed,
}

/// Snapshot of one member.
#[derive(Clone, Debug)]
pub struct GroupMember {
    /// `None` until the request was accepted by the channel
    pub io: Option<IoId>,
    pub channel: ChannelId,
    pub kind: IoKind,
    pub status: MemberStatus,
    /// Value delivered to a read member
    pub value: Option<Vec<u8>>,
}

pub(crate) struct SyncGroup {
    pub(crate) generation: u64,
    pub(crate) members: BTreeMap<u32, GroupMember>,
    pub(crate) outstanding: usize,
    next_slot: u32,
}

impl SyncGroup {
    fn new() -> Self {
        Self {
            generation: 0,
            members: BTreeMap::new(),
            outstanding: 0,
            next_slot: 0,
        }
    }

    fn add(&mut self, channel: ChannelId, kind: IoKind) -> u32 {
        let slot = self.next_slot;
        self.next_slot = self.next_slot.wrapping_add(1);
        self.members.insert(
            slot,
            GroupMember {
                io: None,
                channel,
                kind,
                status: MemberStatus::Pending,
                value: None,
            },
        );
        self.outstanding += 1;
        slot
    }

    /// Drop a member whose request was never issued.
    fn withdraw(&mut self, slot: u32) {
        if let Some(member) = self.members.remove(&slot) {
            if member.status == MemberStatus::Pending {
                self.outstanding -= 1;
            }
        }
    }

    fn complete(&mut self, slot: u32, status: MemberStatus, value: Option<Vec<u8>>) -> bool {
        let Some(member) = self.members.get_mut(&slot) else {
            return false;
        };
        if member.status != MemberStatus::Pending {
            return false;
        }
        member.status = status;
        member.value = value;
        self.outstanding -= 1;
        true
    }

    pub(crate) fn status(&self) -> GroupStatus {
        let failed = self
            .members
            .values()
            .filter(|m| matches!(m.status, MemberStatus::Failed(_)))
            .count();
        let succeeded = self
            .members
            .values()
            .filter(|m| m.status == MemberStatus::Completed)
            .count();
        match (failed, succeeded) {
            (0, _) => GroupStatus::Complete,
            (_, 0) => GroupStatus::Failed,
            (failed, succeeded) => GroupStatus::PartialFailure { failed, succeeded },
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.members.clear();
        self.outstanding = 0;
    }
}

/// Member key carried by the notify objects.
#[derive(Clone, Copy, Debug)]
struct Slot {
    group: GroupId,
    generation: u64,
    slot: u32,
}

struct GroupRead {
    core: Weak<ContextCore>,
    slot: Slot,
}

impl ReadNotify for GroupRead {
    fn completion(&self, _dbr: DbrType, _count: u32, data: &[u8]) {
        if let Some(core) = self.core.upgrade() {
            core.group_member_done(self.slot, MemberStatus::Completed, Some(data.to_vec()));
        }
    }

    fn exception(&self, status: Status, context: &str, _dbr: DbrType, _count: u32) {
        log::debug!("[sync-group] {} read failed: {} ({})", self.slot.group, status, context);
        if let Some(core) = self.core.upgrade() {
            core.group_member_done(self.slot, MemberStatus::Failed(status), None);
        }
    }
}

struct GroupWrite {
    core: Weak<ContextCore>,
    slot: Slot,
}

impl WriteNotify for GroupWrite {
    fn completion(&self) {
        if let Some(core) = self.core.upgrade() {
            core.group_member_done(self.slot, MemberStatus::Completed, None);
        }
    }

    fn exception(&self, status: Status, context: &str, _dbr: DbrType, _count: u32) {
        log::debug!("[sync-group] {} write failed: {} ({})", self.slot.group, status, context);
        if let Some(core) = self.core.upgrade() {
            core.group_member_done(self.slot, MemberStatus::Failed(status), None);
        }
    }
}

impl ContextCore {
    pub fn sync_group_create(&self) -> Result<GroupId> {
        let mut st = self.locks.primary();
        if st.shutdown {
            return Err(Error::ShutDown);
        }
        let id = st.groups.insert_with(|_| SyncGroup::new())?;
        Ok(GroupId(id))
    }

    /// Read `channel` into the group. The value is available from
    /// [`sync_group_members`](Self::sync_group_members) once complete.
    pub fn sync_group_get(&self, group: GroupId, channel: ChannelId, dbr: DbrType, count: u32) -> Result<IoId> {
        let slot = self.group_reserve(group, channel, IoKind::Read)?;
        let notify = Arc::new(GroupRead {
            core: self.me.clone(),
            slot,
        });
        let result = self.read_notify_request(channel, dbr, count, Some(notify));
        self.group_attach(slot, &result);
        result
    }

    /// Write-notify `value` to `channel` through the group.
    pub fn sync_group_put(
        &self,
        group: GroupId,
        channel: ChannelId,
        dbr: DbrType,
        count: u32,
        value: &[u8],
    ) -> Result<IoId> {
        let slot = self.group_reserve(group, channel, IoKind::Write)?;
        let notify = Arc::new(GroupWrite {
            core: self.me.clone(),
            slot,
        });
        let result = self.write_notify_request(channel, dbr, count, value, Some(notify));
        self.group_attach(slot, &result);
        result
    }

    /// Flush, then wait until every member completed or `timeout` elapsed.
    ///
    /// Not available from inside a callback: the completions it waits for
    /// are delivered under the lock that callback holds.
    pub fn sync_group_block(&self, group: GroupId, timeout: Duration) -> Result<GroupStatus> {
        if self.locks.in_callback() {
            return Err(Error::Unsupported("sync group block from a callback"));
        }
        self.flush();
        let deadline = Instant::now() + timeout;
        let mut st = self.locks.primary();
        loop {
            let sg = st.groups.get(group.0).ok_or(Error::BadSyncGroup(group.0))?;
            if sg.outstanding == 0 {
                return Ok(sg.status());
            }
            if st.wait_until(&self.group_cv, deadline) {
                let sg = st.groups.get(group.0).ok_or(Error::BadSyncGroup(group.0))?;
                if sg.outstanding == 0 {
                    return Ok(sg.status());
                }
                log::debug!("[sync-group] {} timed out with {} outstanding", group, sg.outstanding);
                return Err(Error::Timeout);
            }
        }
    }

    /// Non-blocking completion check.
    pub fn sync_group_test(&self, group: GroupId) -> Result<bool> {
        let st = self.locks.primary();
        let sg = st.groups.get(group.0).ok_or(Error::BadSyncGroup(group.0))?;
        Ok(sg.outstanding == 0)
    }

    /// Forget all members. In-flight requests run to completion unobserved.
    pub fn sync_group_reset(&self, group: GroupId) -> Result<()> {
        let mut st = self.locks.primary();
        let sg = st.groups.get_mut(group.0).ok_or(Error::BadSyncGroup(group.0))?;
        sg.reset();
        drop(st);
        self.group_cv.notify_all();
        Ok(())
    }

    pub fn sync_group_delete(&self, group: GroupId) -> Result<()> {
        let mut st = self.locks.primary();
        st.groups.remove(group.0).ok_or(Error::BadSyncGroup(group.0))?;
        drop(st);
        self.group_cv.notify_all();
        Ok(())
    }

    /// Members in issue order.
    pub fn sync_group_members(&self, group: GroupId) -> Result<Vec<GroupMember>> {
        let st = self.locks.primary();
        let sg = st.groups.get(group.0).ok_or(Error::BadSyncGroup(group.0))?;
        Ok(sg.members.values().cloned().collect())
    }

    fn group_reserve(&self, group: GroupId, channel: ChannelId, kind: IoKind) -> Result<Slot> {
        let mut st = self.locks.primary();
        let sg = st.groups.get_mut(group.0).ok_or(Error::BadSyncGroup(group.0))?;
        Ok(Slot {
            group,
            generation: sg.generation,
            slot: sg.add(channel, kind),
        })
    }

    fn group_attach(&self, slot: Slot, result: &Result<IoId>) {
        let mut st = self.locks.primary();
        let Some(sg) = st.groups.get_mut(slot.group.0) else {
            return;
        };
        if sg.generation != slot.generation {
            return;
        }
        match result {
            Ok(io) => {
                if let Some(member) = sg.members.get_mut(&slot.slot) {
                    member.io = Some(*io);
                }
            }
            Err(_) => sg.withdraw(slot.slot),
        }
    }

    fn group_member_done(&self, slot: Slot, status: MemberStatus, value: Option<Vec<u8>>) {
        let mut st = self.locks.primary();
        let Some(sg) = st.groups.get_mut(slot.group.0) else {
            return;
        };
        if sg.generation != slot.generation {
            return;
        }
        if sg.complete(slot.slot, status, value) && sg.outstanding == 0 {
            drop(st);
            self.group_cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_summary() {
        let mut sg = SyncGroup::new();
        assert_eq!(sg.status(), GroupStatus::Complete);

        let a = sg.add(ChannelId(1), IoKind::Read);
        let b = sg.add(ChannelId(2), IoKind::Write);
        assert_eq!(sg.outstanding, 2);
        assert!(sg.complete(a, MemberStatus::Completed, Some(vec![1, 2])));
        assert!(!sg.complete(a, MemberStatus::Completed, None));
        assert!(sg.complete(b, MemberStatus::Failed(Status::PUTFAIL), None));
        assert_eq!(sg.outstanding, 0);
        assert_eq!(
            sg.status(),
            GroupStatus::PartialFailure {
                failed: 1,
                succeeded: 1
            }
        );
        assert_eq!(sg.members[&a].value.as_deref(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_all_failed() {
        let mut sg = SyncGroup::new();
        let a = sg.add(ChannelId(1), IoKind::Read);
        sg.complete(a, MemberStatus::Failed(Status::GETFAIL), None);
        assert_eq!(sg.status(), GroupStatus::Failed);
    }

    #[test]
    fn test_withdraw_and_reset() {
        let mut sg = SyncGroup::new();
        let a = sg.add(ChannelId(1), IoKind::Read);
        sg.add(ChannelId(1), IoKind::Read);
        sg.withdraw(a);
        assert_eq!(sg.outstanding, 1);
        assert_eq!(sg.members.len(), 1);

        sg.reset();
        assert_eq!(sg.generation, 1);
        assert_eq!(sg.outstanding, 0);
        assert!(sg.members.is_empty());
    }

    #[test]
    fn test_unknown_group() {
        let ctx = crate::ClientContext::new(crate::ClientConfig::default()).unwrap();
        let err = ctx.sync_group_test(GroupId(42)).unwrap_err();
        assert!(matches!(err, Error::BadSyncGroup(42)));
        let sg = ctx.sync_group_create().unwrap();
        assert!(ctx.sync_group_test(sg).unwrap());
        assert_eq!(ctx.sync_group_block(sg, Duration::from_millis(10)).unwrap(), GroupStatus::Complete);
        ctx.sync_group_delete(sg).unwrap();
        assert!(ctx.sync_group_delete(sg).is_err());
    }
}
