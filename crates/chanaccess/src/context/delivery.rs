// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deferred side effects of a locked context operation.
//!
//! State changes happen under the primary lock; everything that must not
//! (user callbacks, resolver calls, socket writes) is recorded in
//! [`Effects`] and carried out by `ContextCore::finish` afterwards.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::channel::{AccessRights, ChannelId, ChannelNotify};
use crate::circuit::{CircuitId, Payload};
use crate::io::{IoId, ReadNotify, StateNotify, WriteNotify};
use crate::protocol::{DbrType, Status};

/// Liveness condition checked right before a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Guard {
    /// Always delivered
    None,
    /// Dropped if the channel was destroyed meanwhile
    Channel(ChannelId),
    /// Dropped if the I/O was canceled meanwhile
    Io(IoId),
}

pub(crate) enum Event {
    Connected {
        notify: Arc<dyn ChannelNotify>,
        channel: ChannelId,
    },
    Disconnected {
        notify: Arc<dyn ChannelNotify>,
        channel: ChannelId,
    },
    AccessRights {
        notify: Arc<dyn ChannelNotify>,
        channel: ChannelId,
        rights: AccessRights,
    },
    ChannelException {
        notify: Arc<dyn ChannelNotify>,
        channel: ChannelId,
        status: Status,
        context: String,
    },
    ReadCompleted {
        notify: Arc<dyn ReadNotify>,
        dbr: DbrType,
        count: u32,
        data: Payload,
        len: usize,
    },
    ReadFailed {
        notify: Arc<dyn ReadNotify>,
        status: Status,
        context: String,
        dbr: DbrType,
        count: u32,
    },
    WriteCompleted {
        notify: Arc<dyn WriteNotify>,
    },
    WriteFailed {
        notify: Arc<dyn WriteNotify>,
        status: Status,
        context: String,
        dbr: DbrType,
        count: u32,
    },
    Update {
        notify: Arc<dyn StateNotify>,
        dbr: DbrType,
        count: u32,
        data: Payload,
        len: usize,
    },
    UpdateFailed {
        notify: Arc<dyn StateNotify>,
        status: Status,
        context: String,
        dbr: DbrType,
        count: u32,
    },
    ContextException {
        status: Status,
        context: String,
        server: Option<SocketAddr>,
    },
}

pub(crate) struct Delivery {
    pub(crate) guard: Guard,
    pub(crate) event: Event,
}

/// Work collected under the primary lock.
#[derive(Default)]
pub(crate) struct Effects {
    pub(crate) deliveries: Vec<Delivery>,
    /// Channels to hand to the resolver (id, name)
    pub(crate) searches: Vec<(ChannelId, String)>,
    /// Searches to withdraw
    pub(crate) cancels: Vec<ChannelId>,
    pub(crate) expedite: bool,
    /// Circuits whose send buffer must reach the wire
    pub(crate) flush: BTreeSet<CircuitId>,
}

impl Effects {
    pub(crate) fn deliver(&mut self, guard: Guard, event: Event) {
        self.deliveries.push(Delivery { guard, event });
    }

    pub(crate) fn context_exception(
        &mut self,
        status: Status,
        context: impl Into<String>,
        server: Option<SocketAddr>,
    ) {
        self.deliver(
            Guard::None,
            Event::ContextException {
                status,
                context: context.into(),
                server,
            },
        );
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
            && self.searches.is_empty()
            && self.cancels.is_empty()
            && !self.expedite
            && self.flush.is_empty()
    }
}

impl Event {
    /// Invoke the user callback. Runs with only the callback lock held.
    pub(crate) fn dispatch(self, context_notify: &dyn crate::context::ContextNotify) {
        match self {
            Event::Connected { notify, channel } => notify.connect_notify(channel),
            Event::Disconnected { notify, channel } => notify.disconnect_notify(channel),
            Event::AccessRights {
                notify,
                channel,
                rights,
            } => notify.access_rights_notify(channel, rights),
            Event::ChannelException {
                notify,
                channel,
                status,
                context,
            } => notify.exception(channel, status, &context),
            Event::ReadCompleted {
                notify,
                dbr,
                count,
                data,
                len,
            } => notify.completion(dbr, count, &data[..len.min(data.len())]),
            Event::ReadFailed {
                notify,
                status,
                context,
                dbr,
                count,
            } => notify.exception(status, &context, dbr, count),
            Event::WriteCompleted { notify } => notify.completion(),
            Event::WriteFailed {
                notify,
                status,
                context,
                dbr,
                count,
            } => notify.exception(status, &context, dbr, count),
            Event::Update {
                notify,
                dbr,
                count,
                data,
                len,
            } => notify.current(dbr, count, &data[..len.min(data.len())]),
            Event::UpdateFailed {
                notify,
                status,
                context,
                dbr,
                count,
            } => notify.exception(status, &context, dbr, count),
            Event::ContextException {
                status,
                context,
                server,
            } => context_notify.exception(status, &context, server),
        }
    }
}
