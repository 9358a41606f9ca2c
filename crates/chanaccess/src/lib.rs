// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # chanaccess - Channel Access client core
//!
//! Client side of the Channel Access protocol: named process variables on
//! remote servers are reached through channels, multiplexed over one TCP
//! virtual circuit per (server, priority).
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Application API                             |
//! |   ClientContext -> channels -> read / write / subscribe / groups    |
//! +---------------------------------------------------------------------+
//! |                           Context                                   |
//! |   tables (channels, I/O, circuits) | locks | callback delivery      |
//! +---------------------------------------------------------------------+
//! |                        Virtual circuits                             |
//! |   send buffer + flush | receive thread | framing | echo watchdog    |
//! +---------------------------------------------------------------------+
//! |                           Protocol                                  |
//! |   header codec | request builders | DBR types | status codes        |
//! +---------------------------------------------------------------------+
//! ```
//!
//! Name resolution and beacon reception are outside this crate: plug a
//! [`NameResolver`] into the [`ContextBuilder`] and feed beacons to
//! [`ContextCore::beacon_notify`].
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ClientContext`] | Owner of the context; derefs to [`ContextCore`] |
//! | [`ClientConfig`] | Timeouts, pool capacities, flush policy |
//! | [`ChannelNotify`] | Connection and access-rights callbacks |
//! | [`ReadNotify`] / [`WriteNotify`] / [`StateNotify`] | Per-request callbacks |
//! | [`Error`] | Synchronous errors; asynchronous ones arrive as [`Status`] |

pub mod beacon;
pub mod channel;
pub mod circuit;
pub mod config;
pub mod context;
pub mod error;
pub mod io;
pub mod pool;
pub mod protocol;
pub mod provider;
pub mod sync_group;
pub(crate) mod table;

pub use beacon::{BeaconEntry, BeaconTable, BeaconVerdict};
pub use channel::{AccessRights, ChannelId, ChannelNotify, ChannelState, Priority};
pub use circuit::{ByteStream, CircuitConnector, CircuitId, FlushPolicy, TcpConnector};
pub use config::ClientConfig;
pub use context::{
    ClientContext, ContextBuilder, ContextCore, ContextNotify, ContextStats, LogNotify, NameResolver,
    NullResolver, SearchReplier, SearchRequest,
};
pub use error::{Error, ErrorKind, Result};
pub use io::{EventMask, IoId, IoKind, IoRequest, ReadNotify, StateNotify, WriteNotify};
pub use protocol::{DbrType, MinorVersion, Status};
pub use provider::{ChannelProvider, NetworkProvider, ProvidedChannel, RoutedProvider};
pub use sync_group::{GroupId, GroupMember, GroupStatus, MemberStatus};
