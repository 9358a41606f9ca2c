// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channels: named process variables as seen by the client.
//!
//! ```text
//! Unbound -> Searching -> Connected -> Disconnected -> Searching -> ...
//!                                \____________________________________-> Destroyed
//! ```
//!
//! A channel is bound to at most one circuit. Binding to a new circuit
//! requires removal from the old circuit's member set first.

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::circuit::CircuitId;
use crate::error::{Error, Result};
use crate::io::IoId;
use crate::protocol::{DbrType, Status};

/// Channel handle (the client channel id on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Channel priority, 0 (lowest) to 99 (highest).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const MAX: Priority = Priority(99);
    pub const DEFAULT: Priority = Priority(0);

    pub fn new(value: u32) -> Result<Self> {
        if value > u32::from(Self::MAX.0) {
            return Err(Error::InvalidPriority(value));
        }
        Ok(Self(value as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// Public channel state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, no search issued
    Unbound,
    /// Waiting for name resolution or for the server's create reply
    Searching,
    Connected,
    /// Circuit lost and automatic reconnection disabled
    Disconnected,
    Destroyed,
}

/// Access rights granted by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessRights {
    pub read: bool,
    pub write: bool,
}

impl AccessRights {
    pub const NONE: AccessRights = AccessRights {
        read: false,
        write: false,
    };
    pub const READ_WRITE: AccessRights = AccessRights {
        read: true,
        write: true,
    };

    const READ_BIT: u32 = 0x1;
    const WRITE_BIT: u32 = 0x2;

    pub fn from_bits(bits: u32) -> Self {
        Self {
            read: bits & Self::READ_BIT != 0,
            write: bits & Self::WRITE_BIT != 0,
        }
    }
}

/// Connection-level notifications for one channel.
///
/// Callbacks run on a context thread with the callback lock held; they may
/// call back into the context.
pub trait ChannelNotify: Send + Sync {
    fn connect_notify(&self, _channel: ChannelId) {}

    fn disconnect_notify(&self, _channel: ChannelId) {}

    fn access_rights_notify(&self, _channel: ChannelId, _rights: AccessRights) {}

    fn exception(&self, channel: ChannelId, status: Status, context: &str) {
        log::warn!("[channel] {} exception: {} ({})", channel, status, context);
    }
}

pub(crate) struct Channel {
    pub(crate) id: ChannelId,
    pub(crate) name: String,
    pub(crate) priority: Priority,
    pub(crate) notify: Arc<dyn ChannelNotify>,
    pub(crate) state: ChannelState,
    pub(crate) circuit: Option<CircuitId>,
    /// Server-assigned id, known once the create reply arrives.
    pub(crate) sid: Option<u32>,
    pub(crate) server: Option<SocketAddr>,
    pub(crate) native_type: Option<DbrType>,
    pub(crate) native_count: u32,
    pub(crate) access: AccessRights,
    /// Outstanding I/O, in creation order.
    pub(crate) ios: BTreeSet<IoId>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, name: String, priority: Priority, notify: Arc<dyn ChannelNotify>) -> Self {
        Self {
            id,
            name,
            priority,
            notify,
            state: ChannelState::Unbound,
            circuit: None,
            sid: None,
            server: None,
            native_type: None,
            native_count: 0,
            access: AccessRights::NONE,
            ios: BTreeSet::new(),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// Drop all server-derived state. Outstanding I/O is left to the caller.
    pub(crate) fn unbind(&mut self) {
        self.circuit = None;
        self.sid = None;
        self.server = None;
        self.access = AccessRights::NONE;
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("circuit", &self.circuit)
            .field("sid", &self.sid)
            .field("ios", &self.ios.len())
            .finish()
    }
}
