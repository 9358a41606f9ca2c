// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server response dispatch.
//!
//! A static table of handlers indexed by command code. Each handler runs
//! under the primary lock, mutates state and queues callbacks; it returns
//! whether the circuit stays open. Codes without a client-side meaning, and
//! codes past the end of the table, go to [`bad_response_action`].
//!
//! Correlation is by id only: a response for an id that is no longer
//! outstanding (canceled, destroyed) is dropped silently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::delivery::{Effects, Event, Guard};
use super::state::ContextState;
use super::ContextCore;
use crate::channel::{AccessRights, ChannelId, ChannelState};
use crate::circuit::{CircuitId, Payload};
use crate::io::{IoId, IoKind, IoRecord};
use crate::protocol::{command, request, DbrType, MessageHeader, MinorVersion, Status};

/// Per-response context handed to every handler.
pub(crate) struct Dispatch<'a> {
    pub(crate) st: &'a mut ContextState,
    pub(crate) fx: &'a mut Effects,
    pub(crate) circuit: CircuitId,
    pub(crate) minor: MinorVersion,
    pub(crate) server: SocketAddr,
    pub(crate) violation_limit: u32,
}

type ResponseHandler = fn(&mut Dispatch<'_>, &MessageHeader, Payload) -> bool;

static HANDLERS: [ResponseHandler; command::COMMAND_COUNT] = [
    version_action,            // 0 VERSION
    event_resp_action,         // 1 EVENT_ADD
    bad_response_action,       // 2 EVENT_CANCEL
    read_resp_action,          // 3 READ
    bad_response_action,       // 4 WRITE
    bad_response_action,       // 5 SNAPSHOT
    bad_response_action,       // 6 SEARCH
    bad_response_action,       // 7 BUILD
    bad_response_action,       // 8 EVENTS_OFF
    bad_response_action,       // 9 EVENTS_ON
    bad_response_action,       // 10 READ_SYNC
    exception_resp_action,     // 11 ERROR
    clear_channel_resp_action, // 12 CLEAR_CHANNEL
    bad_response_action,       // 13 RSRV_IS_UP
    bad_response_action,       // 14 NOT_FOUND
    read_notify_resp_action,   // 15 READ_NOTIFY
    bad_response_action,       // 16 READ_BUILD
    bad_response_action,       // 17 REPEATER_CONFIRM
    create_channel_resp_action, // 18 CREATE_CHAN
    write_notify_resp_action,  // 19 WRITE_NOTIFY
    bad_response_action,       // 20 CLIENT_NAME
    bad_response_action,       // 21 HOST_NAME
    access_rights_resp_action, // 22 ACCESS_RIGHTS
    echo_resp_action,          // 23 ECHO
    bad_response_action,       // 24 REPEATER_REGISTER
    bad_response_action,       // 25 SIGNAL
    verify_and_disconnect_chan, // 26 CREATE_CH_FAIL
    verify_and_disconnect_chan, // 27 SERVER_DISCONN
];

impl ContextCore {
    /// Process one response from `circuit`'s server.
    ///
    /// Returns false when the circuit must be closed. Runs on the receive
    /// thread, holding the callback lock through delivery.
    pub(crate) fn execute_response(
        &self,
        circuit: CircuitId,
        timestamp: Instant,
        header: &MessageHeader,
        body: Payload,
    ) -> bool {
        let _cb = self.locks.callback();
        let mut st = self.locks.primary();
        let Some(vc) = st.circuits.get_mut(circuit.0) else {
            return false;
        };
        if !vc.is_connected() {
            return false;
        }
        vc.last_receive = timestamp;
        vc.echo_sent = None;
        vc.stats.messages_received += 1;
        let minor = vc.minor;
        let server = vc.server.addr;

        log::trace!(
            "[dispatch] {} <- {} ({} bytes)",
            circuit,
            command::name(header.command),
            header.payload_size
        );

        let mut fx = Effects::default();
        let keep = {
            let mut d = Dispatch {
                st: &mut *st,
                fx: &mut fx,
                circuit,
                minor,
                server,
                violation_limit: self.config.protocol_violation_limit,
            };
            match HANDLERS.get(usize::from(header.command)) {
                Some(handler) => handler(&mut d, header, body),
                None => bad_response_action(&mut d, header, body),
            }
        };
        if !keep {
            if let Some(vc) = st.circuits.get_mut(circuit.0) {
                let deadline = Instant::now() + self.config.abort_timeout;
                vc.abort(deadline, "too many protocol violations");
            }
        }
        self.finish(st, fx);
        keep
    }
}

impl Dispatch<'_> {
    /// Count a protocol violation; false once the limit is exceeded.
    fn violation(&mut self, what: &str) -> bool {
        let Some(vc) = self.st.circuits.get_mut(self.circuit.0) else {
            return false;
        };
        vc.stats.protocol_violations += 1;
        log::warn!(
            "[dispatch] {} protocol violation {} from {}: {}",
            self.circuit,
            vc.stats.protocol_violations,
            self.server,
            what
        );
        vc.stats.protocol_violations <= self.violation_limit
    }

    /// Channel `cid` if it is bound to this circuit.
    fn bound_channel(&self, cid: u32) -> Option<ChannelId> {
        self.st
            .channels
            .get(cid)
            .filter(|ch| ch.circuit == Some(self.circuit))
            .map(|ch| ch.id)
    }

    fn send(&mut self) -> Option<&mut Vec<u8>> {
        self.st.circuits.get_mut(self.circuit.0).map(|vc| &mut vc.send)
    }
}

/// Payload length a response must carry for `count` elements.
fn required_len(dbr: DbrType, count: u32) -> usize {
    if count == 0 {
        0
    } else {
        dbr.size_n(count)
    }
}

/// Response type/count/length against the request.
fn response_matches(header: &MessageHeader, body: &Payload, dbr: DbrType, count: u32) -> Result<u32, String> {
    if header.data_type != dbr.code() {
        return Err(format!("type {} for a {} request", header.data_type, dbr));
    }
    if count != 0 && header.count != count {
        return Err(format!("count {} for a request of {}", header.count, count));
    }
    let needed = required_len(dbr, header.count);
    if body.len() < needed {
        return Err(format!("body of {} bytes, {} needed", body.len(), needed));
    }
    Ok(header.count)
}

// ============================================================================
// Handlers
// ============================================================================

fn version_action(d: &mut Dispatch<'_>, header: &MessageHeader, _body: Payload) -> bool {
    if header.count == 0 {
        return true;
    }
    if let Some(vc) = d.st.circuits.get_mut(d.circuit.0) {
        vc.minor = MinorVersion(header.count as u16);
        log::debug!("[dispatch] {} server minor version {}", d.circuit, vc.minor.0);
    }
    true
}

fn event_resp_action(d: &mut Dispatch<'_>, header: &MessageHeader, body: Payload) -> bool {
    let id = IoId(header.param2);
    let Some(sub) = d.st.ios.subscription(id) else {
        log::trace!("[dispatch] update for unknown {}", id);
        return true;
    };
    // EVENT_CANCEL confirmation
    if header.payload_size == 0 && body.is_empty() {
        return true;
    }
    let notify = Arc::clone(&sub.notify);
    let (dbr, count) = (sub.dbr, sub.installed_count);
    let status = Status::from_raw(header.param1);

    if body.is_discarded() {
        let event = Event::UpdateFailed {
            notify,
            status: Status::ALLOCMEM,
            context: "no receive buffer for update".into(),
            dbr,
            count,
        };
        d.fx.deliver(Guard::Io(id), event);
        return true;
    }
    if !status.is_success() {
        let event = Event::UpdateFailed {
            notify,
            status,
            context: "subscription update".into(),
            dbr,
            count,
        };
        d.fx.deliver(Guard::Io(id), event);
        return true;
    }
    match response_matches(header, &body, dbr, count) {
        Ok(count) => {
            let len = if count == 0 { body.len() } else { required_len(dbr, count) };
            d.fx.deliver(
                Guard::Io(id),
                Event::Update {
                    notify,
                    dbr,
                    count,
                    data: body,
                    len,
                },
            );
            true
        }
        Err(what) => {
            d.fx.deliver(
                Guard::Io(id),
                Event::UpdateFailed {
                    notify,
                    status: Status::GETFAIL,
                    context: format!("bad update: {}", what),
                    dbr,
                    count,
                },
            );
            d.violation(&what)
        }
    }
}

fn read_resp_action(d: &mut Dispatch<'_>, header: &MessageHeader, body: Payload) -> bool {
    complete_read(d, header, body, false)
}

fn read_notify_resp_action(d: &mut Dispatch<'_>, header: &MessageHeader, body: Payload) -> bool {
    let has_status = d.minor.read_notify_has_status();
    complete_read(d, header, body, has_status)
}

fn complete_read(d: &mut Dispatch<'_>, header: &MessageHeader, body: Payload, has_status: bool) -> bool {
    let id = IoId(header.param2);
    if d.st.ios.kind(id) != Some(IoKind::Read) {
        log::trace!("[dispatch] read response for unknown {}", id);
        return true;
    }
    let Some(IoRecord::Read(io)) = d.st.remove_io(id) else {
        return true;
    };
    let status = if has_status {
        Status::from_raw(header.param1)
    } else {
        Status::NORMAL
    };

    let failure = |status: Status, context: String| Event::ReadFailed {
        notify: Arc::clone(&io.notify),
        status,
        context,
        dbr: io.dbr,
        count: io.count,
    };
    if body.is_discarded() {
        d.fx.deliver(Guard::None, failure(Status::ALLOCMEM, "no receive buffer for read".into()));
        return true;
    }
    if !status.is_success() {
        d.fx.deliver(Guard::None, failure(status, "read failed on server".into()));
        return true;
    }
    match response_matches(header, &body, io.dbr, io.count) {
        Ok(count) => {
            let len = if count == 0 { body.len() } else { required_len(io.dbr, count) };
            d.fx.deliver(
                Guard::None,
                Event::ReadCompleted {
                    notify: Arc::clone(&io.notify),
                    dbr: io.dbr,
                    count,
                    data: body,
                    len,
                },
            );
            true
        }
        Err(what) => {
            d.fx.deliver(Guard::None, failure(Status::GETFAIL, format!("bad read response: {}", what)));
            d.violation(&what)
        }
    }
}

fn write_notify_resp_action(d: &mut Dispatch<'_>, header: &MessageHeader, _body: Payload) -> bool {
    let id = IoId(header.param2);
    if d.st.ios.kind(id) != Some(IoKind::Write) {
        log::trace!("[dispatch] write response for unknown {}", id);
        return true;
    }
    let Some(IoRecord::Write(io)) = d.st.remove_io(id) else {
        return true;
    };
    let status = Status::from_raw(header.param1);
    let event = if status.is_success() {
        Event::WriteCompleted { notify: io.notify }
    } else {
        Event::WriteFailed {
            notify: io.notify,
            status,
            context: "write failed on server".into(),
            dbr: io.dbr,
            count: io.count,
        }
    };
    d.fx.deliver(Guard::None, event);
    true
}

/// ERROR: the body carries the offending request header and a message.
fn exception_resp_action(d: &mut Dispatch<'_>, header: &MessageHeader, body: Payload) -> bool {
    let status = Status::from_raw(header.param2);
    let Ok((req, used)) = MessageHeader::decode(&body) else {
        d.fx.context_exception(status, "server error without request context", Some(d.server));
        return d.violation("truncated error message");
    };
    let text = body[used..]
        .split(|&b| b == 0)
        .next()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .unwrap_or_default();
    log::debug!(
        "[dispatch] {} server error on {}: {} ({})",
        d.circuit,
        command::name(req.command),
        status,
        text
    );

    match req.command {
        command::EVENT_ADD => {
            let id = IoId(req.param2);
            if let Some(sub) = d.st.ios.subscription(id) {
                let event = Event::UpdateFailed {
                    notify: Arc::clone(&sub.notify),
                    status,
                    context: text,
                    dbr: sub.dbr,
                    count: sub.installed_count,
                };
                d.fx.deliver(Guard::Io(id), event);
            }
        }
        command::READ | command::READ_NOTIFY | command::WRITE_NOTIFY => {
            let id = IoId(req.param2);
            let expected = if req.command == command::WRITE_NOTIFY {
                IoKind::Write
            } else {
                IoKind::Read
            };
            if d.st.ios.kind(id) == Some(expected) {
                if let Some(record) = d.st.remove_io(id) {
                    ContextState::fail_io(record, status, &text, d.fx);
                }
            }
        }
        command::WRITE => {
            if let Some(channel) = d.bound_channel(req.param2) {
                if let Some(ch) = d.st.channels.get(channel.0) {
                    let event = Event::ChannelException {
                        notify: Arc::clone(&ch.notify),
                        channel,
                        status,
                        context: text,
                    };
                    d.fx.deliver(Guard::Channel(channel), event);
                }
            }
        }
        _ => d.fx.context_exception(status, text, Some(d.server)),
    }
    true
}

fn clear_channel_resp_action(_d: &mut Dispatch<'_>, _header: &MessageHeader, _body: Payload) -> bool {
    true
}

fn create_channel_resp_action(d: &mut Dispatch<'_>, header: &MessageHeader, _body: Payload) -> bool {
    let (cid, sid) = (header.param1, header.param2);
    let Some(channel) = d.bound_channel(cid) else {
        // destroyed or rebound meanwhile: release the server side
        log::debug!("[dispatch] create reply for unknown channel {}", cid);
        if let Some(send) = d.send() {
            request::clear_channel(send, sid, cid);
        }
        d.fx.flush.insert(d.circuit);
        return true;
    };
    let native_type = match DbrType::new(header.data_type) {
        Ok(t) => t,
        Err(_) => {
            let what = format!("native type {} for channel {}", header.data_type, cid);
            d.fx.context_exception(Status::BADTYPE, what.clone(), Some(d.server));
            return d.violation(&what);
        }
    };

    let legacy = !d.minor.supports_access_rights();
    if let Some(ch) = d.st.channels.get_mut(channel.0) {
        ch.sid = Some(sid);
        ch.native_type = Some(native_type);
        ch.native_count = header.count;
        ch.state = ChannelState::Connected;
        if legacy {
            ch.access = AccessRights::READ_WRITE;
        }
        log::debug!(
            "[dispatch] {} '{}' connected: {} x{}",
            channel,
            ch.name,
            native_type,
            header.count
        );
    }
    d.st.channel_connected(channel, d.fx);
    d.fx.flush.insert(d.circuit);
    true
}

fn access_rights_resp_action(d: &mut Dispatch<'_>, header: &MessageHeader, _body: Payload) -> bool {
    let Some(channel) = d.bound_channel(header.param1) else {
        return true;
    };
    let rights = AccessRights::from_bits(header.param2);
    if let Some(ch) = d.st.channels.get_mut(channel.0) {
        ch.access = rights;
        if ch.is_connected() {
            let event = Event::AccessRights {
                notify: Arc::clone(&ch.notify),
                channel,
                rights,
            };
            d.fx.deliver(Guard::Channel(channel), event);
        }
    }
    true
}

fn echo_resp_action(d: &mut Dispatch<'_>, _header: &MessageHeader, _body: Payload) -> bool {
    if let Some(vc) = d.st.circuits.get_mut(d.circuit.0) {
        vc.echo_sent = None;
    }
    true
}

/// CREATE_CH_FAIL / SERVER_DISCONN: the server dropped one channel.
fn verify_and_disconnect_chan(d: &mut Dispatch<'_>, header: &MessageHeader, _body: Payload) -> bool {
    let Some(channel) = d.bound_channel(header.param1) else {
        return true;
    };
    log::debug!(
        "[dispatch] {} dropped by server ({})",
        channel,
        command::name(header.command)
    );
    d.st.disconnect_channel(channel, d.fx);
    true
}

fn bad_response_action(d: &mut Dispatch<'_>, header: &MessageHeader, _body: Payload) -> bool {
    let what = format!(
        "unexpected command {} ({})",
        header.command,
        command::name(header.command)
    );
    d.fx.context_exception(Status::INTERNAL, what.clone(), Some(d.server));
    d.violation(&what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::context::state::tests::{connected_state, Quiet};
    use crate::io::ReadNotifyIo;

    fn dispatch(
        st: &mut ContextState,
        circuit: CircuitId,
        header: MessageHeader,
        body: Vec<u8>,
    ) -> (bool, Effects) {
        let mut fx = Effects::default();
        let keep = {
            let mut d = Dispatch {
                st,
                fx: &mut fx,
                circuit,
                minor: MinorVersion(13),
                server: SocketAddr::from(([127, 0, 0, 1], 5064)),
                violation_limit: 2,
            };
            match HANDLERS.get(usize::from(header.command)) {
                Some(handler) => handler(&mut d, &header, Payload::from(body)),
                None => bad_response_action(&mut d, &header, Payload::from(body)),
            }
        };
        (keep, fx)
    }

    fn add_read(st: &mut ContextState, ch: ChannelId, count: u32) -> IoId {
        let id = st
            .ios
            .insert_read(|id| ReadNotifyIo {
                id,
                channel: ch,
                dbr: DbrType::DOUBLE,
                count,
                notify: Arc::new(Quiet),
            })
            .unwrap();
        st.channels.get_mut(ch.0).unwrap().ios.insert(id);
        id
    }

    #[test]
    fn test_table_covers_every_command() {
        assert_eq!(HANDLERS.len(), command::COMMAND_COUNT);
    }

    #[test]
    fn test_read_notify_completes_once() {
        let (mut st, cid, ch, _peer) = connected_state(ClientConfig::default());
        let id = add_read(&mut st, ch, 1);
        let header = MessageHeader::new(command::READ_NOTIFY)
            .with_type(DbrType::DOUBLE.code(), 1)
            .with_params(1, id.0);
        let (keep, fx) = dispatch(&mut st, cid, header, 1.5f64.to_be_bytes().to_vec());
        assert!(keep);
        assert!(matches!(fx.deliveries[0].event, Event::ReadCompleted { count: 1, len: 8, .. }));
        assert!(st.ios.kind(id).is_none());
        assert!(st.channels.get(ch.0).unwrap().ios.is_empty());

        // duplicate response is dropped silently
        let (keep, fx) = dispatch(&mut st, cid, header, vec![0; 8]);
        assert!(keep);
        assert!(fx.deliveries.is_empty());
    }

    #[test]
    fn test_read_type_mismatch_fails_request_only() {
        let (mut st, cid, ch, _peer) = connected_state(ClientConfig::default());
        let id = add_read(&mut st, ch, 1);
        let header = MessageHeader::new(command::READ_NOTIFY)
            .with_type(DbrType::SHORT.code(), 1)
            .with_params(1, id.0);
        let (keep, fx) = dispatch(&mut st, cid, header, vec![0; 8]);
        assert!(keep);
        assert!(matches!(fx.deliveries[0].event, Event::ReadFailed { status, .. } if status == Status::GETFAIL));
        assert_eq!(st.circuits.get(cid.0).unwrap().stats.protocol_violations, 1);
    }

    #[test]
    fn test_unknown_command_escalates_past_limit() {
        let (mut st, cid, _ch, _peer) = connected_state(ClientConfig::default());
        let header = MessageHeader::new(200);
        assert!(dispatch(&mut st, cid, header, Vec::new()).0);
        assert!(dispatch(&mut st, cid, header, Vec::new()).0);
        let (keep, fx) = dispatch(&mut st, cid, header, Vec::new());
        assert!(!keep);
        assert!(matches!(fx.deliveries[0].event, Event::ContextException { .. }));
    }

    #[test]
    fn test_create_reply_for_unknown_channel_clears_it() {
        let (mut st, cid, _ch, _peer) = connected_state(ClientConfig::default());
        let header = MessageHeader::new(command::CREATE_CHAN)
            .with_type(DbrType::DOUBLE.code(), 1)
            .with_params(999, 42);
        let (keep, fx) = dispatch(&mut st, cid, header, Vec::new());
        assert!(keep);
        assert!(fx.flush.contains(&cid));
        let send = &st.circuits.get(cid.0).unwrap().send;
        let (sent, _) = MessageHeader::decode(send).unwrap();
        assert_eq!(sent.command, command::CLEAR_CHANNEL);
        assert_eq!((sent.param1, sent.param2), (42, 999));
    }

    #[test]
    fn test_error_on_write_reaches_channel() {
        let (mut st, cid, ch, _peer) = connected_state(ClientConfig::default());
        let req = MessageHeader::new(command::WRITE)
            .with_type(DbrType::DOUBLE.code(), 1)
            .with_params(100, ch.0);
        let mut body = Vec::new();
        req.encode_into(&mut body);
        body.extend_from_slice(b"put rejected\0\0\0\0");
        let header = MessageHeader::new(command::ERROR).with_params(ch.0, Status::PUTFAIL.raw());
        let (keep, fx) = dispatch(&mut st, cid, header, body);
        assert!(keep);
        match &fx.deliveries[0].event {
            Event::ChannelException { status, context, .. } => {
                assert_eq!(*status, Status::PUTFAIL);
                assert_eq!(context, "put rejected");
            }
            _ => panic!("expected channel exception"),
        }
    }

    #[test]
    fn test_server_disconn_unbinds_channel() {
        let (mut st, cid, ch, _peer) = connected_state(ClientConfig::default());
        let header = MessageHeader::new(command::SERVER_DISCONN).with_params(ch.0, 0);
        let (keep, fx) = dispatch(&mut st, cid, header, Vec::new());
        assert!(keep);
        assert!(matches!(fx.deliveries[0].event, Event::Disconnected { .. }));
        assert!(st.channels.get(ch.0).unwrap().circuit.is_none());
        assert!(!st.circuits.get(cid.0).unwrap().channels.contains(&ch));
    }
}
