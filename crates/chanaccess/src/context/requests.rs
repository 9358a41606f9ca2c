// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read, write and subscription requests, their cancellation, and flushing.
//!
//! A request is validated completely before anything is allocated, so a
//! rejected request leaves every table unchanged.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use super::delivery::Effects;
use super::locks::PrimaryGuard;
use super::state::ContextState;
use super::ContextCore;
use crate::channel::{ChannelId, ChannelState};
use crate::circuit::CircuitId;
use crate::error::{Error, Result};
use crate::io::{
    EventMask, IoId, IoRecord, IoRequest, ReadNotify, ReadNotifyIo, StateNotify, Subscription,
    SubscriptionState, WriteNotify, WriteNotifyIo,
};
use crate::protocol::header::EXTENDED_MARKER;
use crate::protocol::{align8, request, DbrType, MinorVersion};

/// Where a request on a connected channel goes.
struct Target {
    circuit: CircuitId,
    sid: u32,
    minor: MinorVersion,
    native_count: u32,
}

fn connected_target(st: &ContextState, channel: ChannelId) -> Result<Target> {
    let ch = st
        .channels
        .get(channel.0)
        .ok_or(Error::BadChannel(channel.0))?;
    if ch.state == ChannelState::Disconnected {
        return Err(Error::Disconnected);
    }
    let circuit = ch.circuit.ok_or(Error::NotBound)?;
    let vc = st.circuits.get(circuit.0).ok_or(Error::Disconnected)?;
    let sid = match ch.sid {
        Some(sid) if ch.is_connected() && vc.is_connected() => sid,
        _ => return Err(Error::Disconnected),
    };
    Ok(Target {
        circuit,
        sid,
        minor: vc.minor,
        native_count: ch.native_count,
    })
}

impl Target {
    /// Resolve the element count against the channel's native count.
    fn count(&self, requested: u32) -> Result<u32> {
        if requested > self.native_count {
            return Err(Error::OutOfBounds {
                requested,
                limit: self.native_count,
            });
        }
        if requested == 0 && !self.minor.supports_dynamic_count() {
            return Ok(self.native_count);
        }
        Ok(requested)
    }

    /// Transfer size against the array limit and the header form the
    /// server understands.
    fn check_size(&self, dbr: DbrType, count: u32, max_array_bytes: usize) -> Result<()> {
        let bytes = dbr.size_n(count);
        if bytes > max_array_bytes {
            return Err(Error::TooLarge {
                bytes,
                limit: max_array_bytes,
            });
        }
        let extended = align8(bytes) >= usize::from(EXTENDED_MARKER) || count >= u32::from(EXTENDED_MARKER);
        if extended && !self.minor.supports_large_arrays() {
            return Err(Error::Unsupported("large array transfer"));
        }
        Ok(())
    }
}

fn check_write_value(dbr: DbrType, count: u32, value: &[u8]) -> Result<()> {
    if !dbr.is_writable() {
        return Err(Error::BadType(dbr.code()));
    }
    if count == 0 {
        return Err(Error::BadCount(0));
    }
    let expected = dbr.size_n(count);
    if value.len() != expected {
        return Err(Error::BadValueLength {
            expected,
            actual: value.len(),
        });
    }
    Ok(())
}

impl ContextCore {
    /// Read `count` elements of `dbr`; `notify` receives exactly one
    /// completion or exception.
    pub fn read_notify_request(
        &self,
        channel: ChannelId,
        dbr: DbrType,
        count: u32,
        notify: Option<Arc<dyn ReadNotify>>,
    ) -> Result<IoId> {
        let notify = notify.ok_or(Error::MissingNotifyTarget)?;
        let mut st = self.locks.primary();
        if st.shutdown {
            return Err(Error::ShutDown);
        }
        let target = connected_target(&st, channel)?;
        if !self.channel_access(&st, channel).read {
            return Err(Error::NoReadAccess);
        }
        let count = target.count(count)?;
        target.check_size(dbr, count, self.config.max_array_bytes)?;

        let id = st.ios.insert_read(|id| ReadNotifyIo {
            id,
            channel,
            dbr,
            count,
            notify,
        })?;
        self.register(&mut st, channel, id);
        if let Some(vc) = st.circuits.get_mut(target.circuit.0) {
            request::read_notify(&mut vc.send, target.sid, id.0, dbr, count);
        }
        log::trace!("[context] {} read {} x{} on {}", id, dbr, count, channel);
        self.queued(st, target.circuit);
        Ok(id)
    }

    /// Unconfirmed write.
    pub fn write_request(&self, channel: ChannelId, dbr: DbrType, count: u32, value: &[u8]) -> Result<()> {
        check_write_value(dbr, count, value)?;
        let mut st = self.locks.primary();
        if st.shutdown {
            return Err(Error::ShutDown);
        }
        let target = connected_target(&st, channel)?;
        if !self.channel_access(&st, channel).write {
            return Err(Error::NoWriteAccess);
        }
        let count = target.count(count)?;
        target.check_size(dbr, count, self.config.max_array_bytes)?;

        if let Some(vc) = st.circuits.get_mut(target.circuit.0) {
            request::write(&mut vc.send, target.sid, channel.0, dbr, count, value);
        }
        log::trace!("[context] write {} x{} on {}", dbr, count, channel);
        self.queued(st, target.circuit);
        Ok(())
    }

    /// Confirmed write; `notify` receives exactly one completion or
    /// exception.
    pub fn write_notify_request(
        &self,
        channel: ChannelId,
        dbr: DbrType,
        count: u32,
        value: &[u8],
        notify: Option<Arc<dyn WriteNotify>>,
    ) -> Result<IoId> {
        let notify = notify.ok_or(Error::MissingNotifyTarget)?;
        check_write_value(dbr, count, value)?;
        let mut st = self.locks.primary();
        if st.shutdown {
            return Err(Error::ShutDown);
        }
        let target = connected_target(&st, channel)?;
        if !self.channel_access(&st, channel).write {
            return Err(Error::NoWriteAccess);
        }
        if !target.minor.supports_write_notify() {
            return Err(Error::Unsupported("write with completion notification"));
        }
        let count = target.count(count)?;
        target.check_size(dbr, count, self.config.max_array_bytes)?;

        let id = st.ios.insert_write(|id| WriteNotifyIo {
            id,
            channel,
            dbr,
            count,
            notify,
        })?;
        self.register(&mut st, channel, id);
        if let Some(vc) = st.circuits.get_mut(target.circuit.0) {
            request::write_notify(&mut vc.send, target.sid, id.0, dbr, count, value);
        }
        log::trace!("[context] {} write-notify {} x{} on {}", id, dbr, count, channel);
        self.queued(st, target.circuit);
        Ok(id)
    }

    /// Subscribe to value changes.
    ///
    /// Accepted on a channel that is not connected yet; the subscription is
    /// installed when the channel connects, and re-installed after every
    /// reconnection.
    pub fn subscription_request(
        &self,
        channel: ChannelId,
        dbr: DbrType,
        count: u32,
        mask: EventMask,
        notify: Option<Arc<dyn StateNotify>>,
    ) -> Result<IoId> {
        let notify = notify.ok_or(Error::MissingNotifyTarget)?;
        let mut st = self.locks.primary();
        if st.shutdown {
            return Err(Error::ShutDown);
        }
        if !st.channels.contains(channel.0) {
            return Err(Error::BadChannel(channel.0));
        }

        let target = match connected_target(&st, channel) {
            Ok(target) => {
                if !self.channel_access(&st, channel).read {
                    return Err(Error::NoReadAccess);
                }
                if count > target.native_count {
                    return Err(Error::OutOfBounds {
                        requested: count,
                        limit: target.native_count,
                    });
                }
                let effective = if count == 0 { target.native_count } else { count };
                target.check_size(dbr, effective, self.config.max_array_bytes)?;
                Some(target)
            }
            Err(Error::NotBound | Error::Disconnected) => None,
            Err(e) => return Err(e),
        };

        let id = st.ios.insert_subscription(|id| Subscription {
            id,
            channel,
            dbr,
            count,
            installed_count: 0,
            mask,
            state: SubscriptionState::Pending,
            notify,
        })?;
        self.register(&mut st, channel, id);
        match target {
            Some(target) => {
                st.install_subscription(id);
                log::trace!("[context] {} subscribed {} on {}", id, dbr, channel);
                self.queued(st, target.circuit);
            }
            None => log::trace!("[context] {} pending until {} connects", id, channel),
        }
        Ok(id)
    }

    /// Cancel an outstanding request. For an installed subscription the
    /// server is told to stop sending updates.
    ///
    /// Returns false when the request already completed or does not belong
    /// to `channel`. After this returns, no callback for `id` runs.
    pub fn cancel_io(&self, channel: ChannelId, id: IoId) -> bool {
        let _cb = self.locks.callback();
        let mut st = self.locks.primary();
        if st.ios.channel_of(id) != Some(channel) {
            return false;
        }
        let Some(record) = st.remove_io(id) else {
            return false;
        };

        let mut fx = Effects::default();
        if let IoRecord::Subscription(sub) = &record {
            if sub.state == SubscriptionState::Installed {
                if let Ok(target) = connected_target(&st, channel) {
                    if let Some(vc) = st.circuits.get_mut(target.circuit.0) {
                        request::event_cancel(&mut vc.send, target.sid, id.0, sub.dbr, sub.installed_count);
                    }
                    st.flush_if_required(target.circuit, &mut fx);
                }
            }
        }
        log::trace!("[context] {} canceled", id);
        self.finish(st, fx);
        true
    }

    /// Remove a request without telling the server.
    ///
    /// `None` when it already completed or was removed; the second of two
    /// calls always gets `None`.
    pub fn destroy_io(&self, id: IoId, channel: ChannelId) -> Option<IoRequest> {
        let _cb = self.locks.callback();
        let mut st = self.locks.primary();
        if st.ios.channel_of(id) != Some(channel) {
            return None;
        }
        st.remove_io(id).map(|record| record.describe())
    }

    /// Description of an outstanding request.
    pub fn io_request(&self, id: IoId) -> Option<IoRequest> {
        self.locks.primary().ios.describe(id)
    }

    /// Push every circuit's queued requests onto the wire.
    pub fn flush(&self) {
        let mut st = self.locks.primary();
        let pending: Vec<CircuitId> = st
            .circuits
            .iter()
            .filter(|(_, vc)| vc.is_connected() && !vc.send.is_empty())
            .map(|(id, _)| CircuitId(id))
            .collect();
        for circuit in pending {
            self.flush_circuit(&mut st, circuit);
        }
    }

    /// Write one circuit's send buffer.
    ///
    /// One thread at a time owns a circuit's flush (`vc.flushing`); a second
    /// caller leaves its bytes queued and the owner writes them on its next
    /// pass, so buffers leave in queue order. The writer lock is only taken
    /// with the primary lock released. A failed write aborts the circuit;
    /// its receive thread does the cleanup.
    pub(crate) fn flush_circuit(&self, st: &mut PrimaryGuard<'_, ContextState>, circuit: CircuitId) {
        {
            let Some(vc) = st.circuits.get_mut(circuit.0) else {
                return;
            };
            if vc.flushing {
                return;
            }
            vc.flushing = true;
        }

        loop {
            let (writer, bytes) = {
                let Some(vc) = st.circuits.get_mut(circuit.0) else {
                    return;
                };
                let writer = match &vc.writer {
                    Some(writer) if vc.is_connected() && !vc.send.is_empty() => Arc::clone(writer),
                    _ => {
                        vc.flushing = false;
                        return;
                    }
                };
                (writer, std::mem::take(&mut vc.send))
            };

            let (result, mut bytes) = st.unlocked(move || {
                let mut stream = writer.lock();
                let result = stream.write_all(&bytes).and_then(|()| stream.flush());
                drop(stream);
                (result, bytes)
            });

            let Some(vc) = st.circuits.get_mut(circuit.0) else {
                return;
            };
            match result {
                Ok(()) => {
                    vc.stats.bytes_sent += bytes.len() as u64;
                    vc.stats.flushes += 1;
                    if vc.send.is_empty() {
                        bytes.clear();
                        vc.send = bytes;
                    }
                }
                Err(e) => {
                    let deadline = Instant::now() + self.config.abort_timeout;
                    vc.abort(deadline, &format!("send failed: {}", e));
                    vc.flushing = false;
                    return;
                }
            }
        }
    }

    fn channel_access(&self, st: &ContextState, channel: ChannelId) -> crate::channel::AccessRights {
        st.channels
            .get(channel.0)
            .map(|ch| ch.access)
            .unwrap_or_default()
    }

    fn register(&self, st: &mut ContextState, channel: ChannelId, id: IoId) {
        if let Some(ch) = st.channels.get_mut(channel.0) {
            ch.ios.insert(id);
        }
    }

    /// A request was queued on `circuit`.
    fn queued(&self, st: PrimaryGuard<'_, ContextState>, circuit: CircuitId) {
        let mut fx = Effects::default();
        st.flush_if_required(circuit, &mut fx);
        self.finish(st, fx);
    }
}
