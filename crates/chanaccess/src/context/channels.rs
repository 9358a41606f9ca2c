// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel lifecycle and per-channel queries.

use std::net::SocketAddr;
use std::sync::Arc;

use super::delivery::{Effects, Event, Guard};
use super::locks::PrimaryGuard;
use super::state::ContextState;
use super::ContextCore;
use crate::channel::{AccessRights, Channel, ChannelId, ChannelNotify, ChannelState, Priority};
use crate::circuit::{priority, receiver, CircuitId, ServerId, VirtualCircuit};
use crate::config::MAX_CHANNEL_NAME_LEN;
use crate::error::{Error, Result};
use crate::protocol::{request, DbrType, MinorVersion, Status};

impl ContextCore {
    /// Register a channel and start resolving its name.
    ///
    /// Never blocks on the network. `priority` selects the circuit (0-99).
    pub fn create_channel(
        &self,
        name: &str,
        notify: Option<Arc<dyn ChannelNotify>>,
        priority: u32,
    ) -> Result<ChannelId> {
        let notify = notify.ok_or(Error::MissingNotifyTarget)?;
        if name.is_empty() {
            return Err(Error::EmptyChannelName);
        }
        if name.len() > MAX_CHANNEL_NAME_LEN {
            return Err(Error::ChannelNameTooLong(name.len()));
        }
        let priority = Priority::new(priority)?;

        let mut st = self.locks.primary();
        if st.shutdown {
            return Err(Error::ShutDown);
        }
        let id = st.channels.insert_with(|id| {
            let mut ch = Channel::new(ChannelId(id), name.to_string(), priority, notify);
            ch.state = ChannelState::Searching;
            ch
        })?;
        let id = ChannelId(id);
        log::debug!("[context] created {} '{}' priority {}", id, name, priority.value());

        let mut fx = Effects::default();
        fx.searches.push((id, name.to_string()));
        self.finish(st, fx);
        Ok(id)
    }

    /// Restart name resolution for a channel that is neither bound nor
    /// searching. No-op otherwise.
    pub fn initiate_connect(&self, channel: ChannelId) -> Result<()> {
        let mut st = self.locks.primary();
        if st.shutdown {
            return Err(Error::ShutDown);
        }
        let ch = st
            .channels
            .get_mut(channel.0)
            .ok_or(Error::BadChannel(channel.0))?;
        if ch.circuit.is_some() || ch.state == ChannelState::Searching {
            return Ok(());
        }
        ch.state = ChannelState::Searching;
        let mut fx = Effects::default();
        fx.searches.push((channel, ch.name.clone()));
        self.finish(st, fx);
        Ok(())
    }

    /// Destroy a channel.
    ///
    /// Outstanding I/O fails with a channel-destroyed status, the server is
    /// told to clear the channel, and any pending search is withdrawn.
    pub fn destroy_channel(&self, channel: ChannelId) -> Result<()> {
        let _cb = self.locks.callback();
        let mut st = self.locks.primary();
        let ch = st
            .channels
            .remove(channel.0)
            .ok_or(Error::BadChannel(channel.0))?;
        let mut fx = Effects::default();

        if let Some(circuit) = ch.circuit {
            if let Some(vc) = st.circuits.get_mut(circuit.0) {
                vc.channels.remove(&channel);
                vc.create_pending.retain(|&c| c != channel);
                if ch.is_connected() && vc.is_connected() {
                    if let Some(sid) = ch.sid {
                        request::clear_channel(&mut vc.send, sid, channel.0);
                    }
                }
            }
            st.flush_if_required(circuit, &mut fx);
        }

        for id in &ch.ios {
            if let Some(record) = st.ios.remove(*id) {
                ContextState::fail_io(record, Status::CHANDESTROY, "channel destroyed", &mut fx);
            }
        }
        if ch.state == ChannelState::Searching {
            fx.cancels.push(channel);
        }
        log::debug!("[context] destroyed {} '{}'", channel, ch.name);
        self.finish(st, fx);
        Ok(())
    }

    /// Bind a searching channel to the circuit for `server`, dialing one if
    /// needed. This is the resolver's success path.
    ///
    /// A second answer from a different server raises a duplicate-channel
    /// context exception and is otherwise ignored.
    pub fn transfer_channel_to_circuit(
        &self,
        channel: ChannelId,
        server: SocketAddr,
        minor: MinorVersion,
    ) -> Result<()> {
        let _cb = self.locks.callback();
        let mut st = self.locks.primary();
        if st.shutdown {
            return Err(Error::ShutDown);
        }
        let ch = st
            .channels
            .get(channel.0)
            .ok_or(Error::BadChannel(channel.0))?;
        let mut fx = Effects::default();

        if let Some(existing) = ch.server {
            if existing != server {
                let msg = format!(
                    "channel '{}' answered by {} and {}; keeping {}",
                    ch.name, existing, server, existing
                );
                fx.context_exception(Status::DBLCHNL, msg, Some(server));
                self.finish(st, fx);
            }
            return Ok(());
        }
        if ch.state != ChannelState::Searching {
            return Ok(());
        }

        let server_id = ServerId {
            addr: server,
            priority: ch.priority,
        };
        let name = ch.name.clone();
        let circuit = match st.servers.get(&server_id) {
            Some(&circuit) => circuit,
            None => self.create_circuit(&mut st, server_id, minor)?,
        };

        let Some(vc) = st.circuits.get_mut(circuit.0) else {
            return Err(Error::Disconnected);
        };
        vc.channels.insert(channel);
        if vc.is_connected() {
            request::create_channel(&mut vc.send, channel.0, &name);
            fx.flush.insert(circuit);
        } else {
            vc.create_pending.push(channel);
        }
        if let Some(ch) = st.channels.get_mut(channel.0) {
            ch.circuit = Some(circuit);
            ch.server = Some(server);
        }
        log::debug!("[context] {} '{}' bound to {} ({})", channel, name, circuit, server);
        self.finish(st, fx);
        Ok(())
    }

    /// New circuit plus its receive thread.
    fn create_circuit(
        &self,
        st: &mut PrimaryGuard<'_, ContextState>,
        server: ServerId,
        minor: MinorVersion,
    ) -> Result<CircuitId> {
        let core = self.me.upgrade().ok_or(Error::ShutDown)?;
        let level = priority::service_level(self.config.base_thread_priority, server.priority.value());
        let id = st
            .circuits
            .insert_with(|id| VirtualCircuit::new(CircuitId(id), server, minor, level))?;
        let id = CircuitId(id);

        match receiver::spawn(core, id, server, level) {
            Ok(handle) => {
                if let Some(vc) = st.circuits.get_mut(id.0) {
                    vc.receiver = Some(handle);
                }
                st.servers.insert(server, id);
                log::info!("[context] {} dialing {} (service level {})", id, server.addr, level);
                Ok(id)
            }
            Err(e) => {
                st.circuits.remove(id.0);
                log::error!("[context] cannot start receive thread for {}: {}", server.addr, e);
                Err(Error::Io(e))
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current state; [`ChannelState::Destroyed`] for unknown ids.
    pub fn channel_state(&self, channel: ChannelId) -> ChannelState {
        self.locks
            .primary()
            .channels
            .get(channel.0)
            .map_or(ChannelState::Destroyed, |ch| ch.state)
    }

    pub fn channel_name(&self, channel: ChannelId) -> Result<String> {
        self.with_channel(channel, |ch| ch.name.clone())
    }

    /// Server-declared type, once connected.
    pub fn native_type(&self, channel: ChannelId) -> Result<Option<DbrType>> {
        self.with_channel(channel, |ch| ch.native_type)
    }

    /// Server-declared element count (0 before the first connection).
    pub fn native_count(&self, channel: ChannelId) -> Result<u32> {
        self.with_channel(channel, |ch| ch.native_count)
    }

    pub fn access_rights(&self, channel: ChannelId) -> Result<AccessRights> {
        self.with_channel(channel, |ch| ch.access)
    }

    /// Address of the server the channel is bound to.
    pub fn server_address(&self, channel: ChannelId) -> Result<Option<SocketAddr>> {
        self.with_channel(channel, |ch| ch.server)
    }

    fn with_channel<T>(&self, channel: ChannelId, f: impl FnOnce(&Channel) -> T) -> Result<T> {
        let st = self.locks.primary();
        st.channels
            .get(channel.0)
            .map(f)
            .ok_or(Error::BadChannel(channel.0))
    }
}

impl ContextState {
    /// Queue the connection notification and install waiting subscriptions.
    pub(crate) fn channel_connected(&mut self, channel: ChannelId, fx: &mut Effects) {
        let Some(ch) = self.channels.get(channel.0) else {
            return;
        };
        fx.deliver(
            Guard::Channel(channel),
            Event::Connected {
                notify: Arc::clone(&ch.notify),
                channel,
            },
        );
        fx.deliver(
            Guard::Channel(channel),
            Event::AccessRights {
                notify: Arc::clone(&ch.notify),
                channel,
                rights: ch.access,
            },
        );
        let subscriptions: Vec<_> = ch.ios.iter().copied().collect();
        for id in subscriptions {
            let waiting = self
                .ios
                .subscription(id)
                .is_some_and(|sub| sub.state != crate::io::SubscriptionState::Installed);
            if waiting {
                self.install_subscription(id);
            }
        }
    }
}
