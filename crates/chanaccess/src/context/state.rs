// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tables guarded by the primary lock, and the state transitions shared by
//! the API, dispatch and timer paths.
//!
//! Nothing here blocks or calls user code; side effects are recorded in
//! [`Effects`].

use std::collections::HashMap;
use std::net::Shutdown;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use super::delivery::{Effects, Event, Guard};
use crate::beacon::BeaconTable;
use crate::channel::{Channel, ChannelId, ChannelState};
use crate::circuit::{CircuitId, CircuitState, FlushPolicy, ServerId, VirtualCircuit};
use crate::config::ClientConfig;
use crate::io::{IoId, IoKind, IoRecord, IoTable, SubscriptionState};
use crate::protocol::request;
use crate::protocol::Status;
use crate::sync_group::SyncGroup;
use crate::table::IdTable;

pub(crate) struct ContextState {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) channels: IdTable<Channel>,
    pub(crate) ios: IoTable,
    pub(crate) circuits: IdTable<VirtualCircuit>,
    pub(crate) servers: HashMap<ServerId, CircuitId>,
    pub(crate) beacons: BeaconTable,
    pub(crate) groups: IdTable<SyncGroup>,
    /// Receive threads of destroyed circuits, joined at shutdown.
    pub(crate) retired: Vec<JoinHandle<()>>,
    pub(crate) shutdown: bool,
}

impl ContextState {
    pub(crate) fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            channels: IdTable::new("channel", config.max_channels),
            ios: IoTable::new(
                config.max_read_requests,
                config.max_write_requests,
                config.max_subscriptions,
            ),
            circuits: IdTable::new("circuit", config.max_circuits),
            servers: HashMap::new(),
            beacons: BeaconTable::new(),
            groups: IdTable::new("sync group", config.max_sync_groups),
            retired: Vec::new(),
            shutdown: false,
            config,
        }
    }

    pub(crate) fn circuit_ids(&self) -> Vec<CircuitId> {
        self.circuits.ids().into_iter().map(CircuitId).collect()
    }

    pub(crate) fn searching_channels(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter(|(_, ch)| ch.state == ChannelState::Searching)
            .map(|(_, ch)| ch.id)
            .collect()
    }

    /// Queue a flush when the policy or the buffer size asks for one.
    pub(crate) fn flush_if_required(&self, circuit: CircuitId, fx: &mut Effects) {
        let Some(vc) = self.circuits.get(circuit.0) else {
            return;
        };
        if self.config.flush_policy == FlushPolicy::Immediate
            || vc.send.len() >= self.config.flush_threshold
        {
            fx.flush.insert(circuit);
        }
    }

    // ========================================================================
    // I/O bookkeeping
    // ========================================================================

    /// Remove an I/O from the global table and its channel's list.
    pub(crate) fn remove_io(&mut self, id: IoId) -> Option<IoRecord> {
        let record = self.ios.remove(id)?;
        if let Some(ch) = self.channels.get_mut(record.channel().0) {
            ch.ios.remove(&id);
        }
        Some(record)
    }

    /// Queue the failure callback of a removed request.
    pub(crate) fn fail_io(record: IoRecord, status: Status, context: &str, fx: &mut Effects) {
        let event = match record {
            IoRecord::Read(io) => Event::ReadFailed {
                notify: io.notify,
                status,
                context: context.to_string(),
                dbr: io.dbr,
                count: io.count,
            },
            IoRecord::Write(io) => Event::WriteFailed {
                notify: io.notify,
                status,
                context: context.to_string(),
                dbr: io.dbr,
                count: io.count,
            },
            IoRecord::Subscription(io) => Event::UpdateFailed {
                notify: io.notify,
                status,
                context: context.to_string(),
                dbr: io.dbr,
                count: io.count,
            },
        };
        fx.deliver(Guard::None, event);
    }

    /// Send EVENT_ADD for a subscription whose channel is connected.
    ///
    /// The count is clipped to the native count; a zero count stays zero
    /// only when the server understands dynamic counts.
    pub(crate) fn install_subscription(&mut self, id: IoId) -> bool {
        let Some(channel) = self.ios.channel_of(id) else {
            return false;
        };
        let Some(ch) = self.channels.get(channel.0) else {
            return false;
        };
        let (Some(circuit), Some(sid)) = (ch.circuit, ch.sid) else {
            return false;
        };
        let native = ch.native_count;
        let Some(vc) = self.circuits.get_mut(circuit.0) else {
            return false;
        };
        if !vc.is_connected() {
            return false;
        }
        let Some(sub) = self.ios.subscription_mut(id) else {
            return false;
        };

        let count = match sub.count {
            0 if vc.minor.supports_dynamic_count() => 0,
            0 => native,
            n => n.min(native),
        };
        request::event_add(&mut vc.send, sid, id.0, sub.dbr, count, sub.mask.bits());
        sub.installed_count = count;
        sub.state = SubscriptionState::Installed;
        log::trace!("[context] {} installed on {} (count {})", id, channel, count);
        true
    }

    // ========================================================================
    // Channel transitions
    // ========================================================================

    /// Detach a channel from its circuit after the circuit or the server
    /// dropped it.
    ///
    /// The disconnect notification is queued before the failures of its
    /// outstanding reads and writes; subscriptions are kept for
    /// re-installation.
    pub(crate) fn disconnect_channel(&mut self, channel: ChannelId, fx: &mut Effects) {
        let reconnect = self.config.auto_reconnect && !self.shutdown;
        let Some(ch) = self.channels.get_mut(channel.0) else {
            return;
        };
        if let Some(circuit) = ch.circuit {
            if let Some(vc) = self.circuits.get_mut(circuit.0) {
                vc.channels.remove(&channel);
                vc.create_pending.retain(|&c| c != channel);
            }
        }

        let was_connected = ch.is_connected();
        if was_connected {
            fx.deliver(
                Guard::Channel(channel),
                Event::Disconnected {
                    notify: Arc::clone(&ch.notify),
                    channel,
                },
            );
        }
        ch.unbind();
        if reconnect {
            ch.state = ChannelState::Searching;
            fx.searches.push((channel, ch.name.clone()));
        } else {
            ch.state = ChannelState::Disconnected;
        }
        let ios: Vec<IoId> = ch.ios.iter().copied().collect();

        for id in ios {
            match self.ios.kind(id) {
                Some(IoKind::Subscription) => {
                    if let Some(sub) = self.ios.subscription_mut(id) {
                        if sub.state == SubscriptionState::Installed {
                            sub.state = SubscriptionState::Disconnected;
                        }
                    }
                }
                Some(_) => {
                    if let Some(record) = self.remove_io(id) {
                        Self::fail_io(record, Status::DISCONN, "circuit lost", fx);
                    }
                }
                None => {}
            }
        }
    }

    /// Remove a circuit and disconnect every channel bound to it.
    pub(crate) fn destroy_circuit(&mut self, id: CircuitId, fx: &mut Effects) {
        let Some(mut vc) = self.circuits.remove(id.0) else {
            return;
        };
        if self.servers.get(&vc.server) == Some(&id) {
            self.servers.remove(&vc.server);
        }
        vc.shutdown_socket(Shutdown::Both);
        vc.state = CircuitState::Closed;
        if let Some(handle) = vc.receiver.take() {
            self.retired.push(handle);
        }
        log::info!(
            "[context] {} to {} closed ({} channel(s))",
            id,
            vc.server.addr,
            vc.channels.len()
        );

        for channel in std::mem::take(&mut vc.channels) {
            let bound_here = self
                .channels
                .get(channel.0)
                .is_some_and(|ch| ch.circuit == Some(id));
            if bound_here {
                self.disconnect_channel(channel, fx);
            }
        }
    }

    /// Abort every circuit and collect the receive threads to join.
    pub(crate) fn begin_shutdown(&mut self, now: Instant) -> Vec<JoinHandle<()>> {
        let mut handles = std::mem::take(&mut self.retired);
        for (_, vc) in self.circuits.iter_mut() {
            vc.abort(now, "context shutdown");
            if let Some(handle) = vc.receiver.take() {
                handles.push(handle);
            }
        }
        handles
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::{AccessRights, ChannelNotify, Priority};
    use crate::circuit::stream::mock::MockStream;
    use crate::io::{EventMask, ReadNotify, StateNotify, Subscription};
    use crate::protocol::{DbrType, MinorVersion};
    use std::net::SocketAddr;

    pub(crate) struct Quiet;
    impl ChannelNotify for Quiet {}
    impl ReadNotify for Quiet {
        fn completion(&self, _: DbrType, _: u32, _: &[u8]) {}
        fn exception(&self, _: Status, _: &str, _: DbrType, _: u32) {}
    }
    impl StateNotify for Quiet {
        fn current(&self, _: DbrType, _: u32, _: &[u8]) {}
        fn exception(&self, _: Status, _: &str, _: DbrType, _: u32) {}
    }

    /// State with one connected circuit and one connected channel.
    pub(crate) fn connected_state(config: ClientConfig) -> (ContextState, CircuitId, ChannelId, MockStream) {
        let mut st = ContextState::new(Arc::new(config));
        let server = ServerId {
            addr: SocketAddr::from(([127, 0, 0, 1], 5064)),
            priority: Priority::DEFAULT,
        };
        let cid = CircuitId(
            st.circuits
                .insert_with(|id| VirtualCircuit::new(CircuitId(id), server, MinorVersion(13), 50))
                .unwrap(),
        );
        st.servers.insert(server, cid);
        let (client, peer) = MockStream::pair();
        let vc = st.circuits.get_mut(cid.0).unwrap();
        vc.control = Some(Box::new(client));
        vc.state = CircuitState::Connected;

        let ch = ChannelId(
            st.channels
                .insert_with(|id| {
                    let mut ch = Channel::new(ChannelId(id), "PV:A".into(), Priority::DEFAULT, Arc::new(Quiet));
                    ch.state = ChannelState::Connected;
                    ch.circuit = Some(cid);
                    ch.sid = Some(100);
                    ch.server = Some(server.addr);
                    ch.native_type = Some(DbrType::DOUBLE);
                    ch.native_count = 5;
                    ch.access = AccessRights::READ_WRITE;
                    ch
                })
                .unwrap(),
        );
        st.circuits.get_mut(cid.0).unwrap().channels.insert(ch);
        (st, cid, ch, peer)
    }

    fn add_subscription(st: &mut ContextState, ch: ChannelId, count: u32) -> IoId {
        let id = st
            .ios
            .insert_subscription(|id| Subscription {
                id,
                channel: ch,
                dbr: DbrType::DOUBLE,
                count,
                installed_count: 0,
                mask: EventMask::VALUE,
                state: SubscriptionState::Pending,
                notify: Arc::new(Quiet),
            })
            .unwrap();
        st.channels.get_mut(ch.0).unwrap().ios.insert(id);
        id
    }

    #[test]
    fn test_install_clips_count_to_native() {
        let (mut st, cid, ch, _peer) = connected_state(ClientConfig::default());
        let id = add_subscription(&mut st, ch, 50);
        assert!(st.install_subscription(id));
        let sub = st.ios.subscription(id).unwrap();
        assert_eq!(sub.installed_count, 5);
        assert_eq!(sub.state, SubscriptionState::Installed);
        assert!(!st.circuits.get(cid.0).unwrap().send.is_empty());
    }

    #[test]
    fn test_disconnect_keeps_subscriptions_and_fails_reads() {
        let (mut st, cid, ch, _peer) = connected_state(ClientConfig::default());
        let sub = add_subscription(&mut st, ch, 1);
        st.install_subscription(sub);
        let read = st
            .ios
            .insert_read(|id| crate::io::ReadNotifyIo {
                id,
                channel: ch,
                dbr: DbrType::DOUBLE,
                count: 1,
                notify: Arc::new(Quiet),
            })
            .unwrap();
        st.channels.get_mut(ch.0).unwrap().ios.insert(read);

        let mut fx = Effects::default();
        st.destroy_circuit(cid, &mut fx);

        assert!(st.circuits.is_empty());
        assert!(st.servers.is_empty());
        let channel = st.channels.get(ch.0).unwrap();
        assert_eq!(channel.state, ChannelState::Searching);
        assert!(channel.circuit.is_none());
        assert!(st.ios.kind(read).is_none());
        assert_eq!(
            st.ios.subscription(sub).unwrap().state,
            SubscriptionState::Disconnected
        );
        // disconnect notification first, then the read failure
        assert!(matches!(fx.deliveries[0].event, Event::Disconnected { .. }));
        assert!(matches!(fx.deliveries[1].event, Event::ReadFailed { status, .. } if status == Status::DISCONN));
        assert_eq!(fx.searches.len(), 1);
    }

    #[test]
    fn test_no_research_without_auto_reconnect() {
        let (mut st, cid, ch, _peer) = connected_state(ClientConfig::default().with_auto_reconnect(false));
        let mut fx = Effects::default();
        st.destroy_circuit(cid, &mut fx);
        assert_eq!(st.channels.get(ch.0).unwrap().state, ChannelState::Disconnected);
        assert!(fx.searches.is_empty());
    }

    #[test]
    fn test_immediate_policy_requests_flush() {
        let config = ClientConfig::default().with_flush_policy(FlushPolicy::Immediate);
        let (st, cid, _ch, _peer) = connected_state(config);
        let mut fx = Effects::default();
        st.flush_if_required(cid, &mut fx);
        assert!(fx.flush.contains(&cid));
    }
}
