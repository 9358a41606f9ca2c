// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Circuit lifecycle as seen from the context: handshake, teardown, and the
//! periodic echo watchdog.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

use super::delivery::Effects;
use super::ContextCore;
use crate::circuit::{BoxedByteStream, CircuitId, CircuitState};
use crate::error::{Error, Result};
use crate::protocol::{request, Status};

impl ContextCore {
    /// The receive thread dialed its server.
    ///
    /// Stores the writer and control handles, queues the handshake and the
    /// CREATE_CHAN requests of channels bound while dialing, and flushes.
    /// Returns the handle the receive thread reads from.
    pub(crate) fn circuit_connected(&self, circuit: CircuitId, stream: BoxedByteStream) -> Result<BoxedByteStream> {
        stream.set_read_timeout(Some(self.config.receive_poll))?;
        let writer = stream.try_clone_stream()?;
        writer.set_write_timeout(Some(self.config.connection_timeout))?;
        let control = stream.try_clone_stream()?;

        let mut st = self.locks.primary();
        let st_ref = &mut *st;
        let Some(vc) = st_ref.circuits.get_mut(circuit.0) else {
            return Err(Error::ShutDown);
        };
        if vc.state != CircuitState::Connecting {
            return Err(Error::Disconnected);
        }
        vc.writer = Some(Arc::new(Mutex::new(writer)));
        vc.control = Some(control);
        vc.state = CircuitState::Connected;
        vc.last_receive = Instant::now();

        request::version(&mut vc.send, vc.server.priority.value());
        if vc.minor.supports_client_host_name() {
            request::host_name(&mut vc.send, &st_ref.config.host_name);
            request::client_name(&mut vc.send, &st_ref.config.user_name);
        }
        let pending = std::mem::take(&mut vc.create_pending);
        for channel in &pending {
            let Some(ch) = st_ref.channels.get(channel.0) else {
                continue;
            };
            if ch.circuit == Some(circuit) {
                request::create_channel(&mut vc.send, channel.0, &ch.name);
            }
        }
        log::info!(
            "[context] {} connected to {} ({} channel(s) pending)",
            circuit,
            vc.server.addr,
            pending.len()
        );

        let mut fx = Effects::default();
        fx.flush.insert(circuit);
        self.finish(st, fx);
        Ok(stream)
    }

    /// Whether the receive thread of `circuit` should stop reading.
    pub(crate) fn circuit_stopping(&self, circuit: CircuitId) -> bool {
        let st = self.locks.primary();
        st.shutdown
            || st
                .circuits
                .get(circuit.0)
                .is_none_or(|vc| vc.state != CircuitState::Connected)
    }

    /// Receive thread exit: destroy the circuit, disconnecting its channels.
    pub(crate) fn receive_exit(&self, circuit: CircuitId, reason: &str) {
        let _cb = self.locks.callback();
        let mut st = self.locks.primary();
        let mut fx = Effects::default();
        if let Some(vc) = st.circuits.get(circuit.0) {
            if vc.state == CircuitState::Connected && !st.shutdown {
                fx.context_exception(
                    Status::DISCONN,
                    format!("virtual circuit {} lost: {}", circuit, reason),
                    Some(vc.server.addr),
                );
            }
        }
        st.destroy_circuit(circuit, &mut fx);
        self.finish(st, fx);
    }

    /// One timer tick: echo probes, unresponsive circuits, and overdue
    /// aborts.
    pub(crate) fn timer_tick(&self, now: Instant) {
        let _cb = self.locks.callback();
        let mut st = self.locks.primary();
        if st.shutdown {
            return;
        }
        let config = Arc::clone(&self.config);
        let mut fx = Effects::default();
        let mut overdue = Vec::new();

        for (id, vc) in st.circuits.iter_mut() {
            let id = CircuitId(id);
            match vc.state {
                CircuitState::Connected => {
                    if let Some(sent) = vc.echo_sent {
                        if now.saturating_duration_since(sent) >= config.echo_timeout {
                            fx.context_exception(
                                Status::UNRESPTMO,
                                format!("no echo reply within {:?}", config.echo_timeout),
                                Some(vc.server.addr),
                            );
                            vc.abort(now + config.abort_timeout, "unresponsive");
                        }
                    } else if now.saturating_duration_since(vc.last_receive) >= config.connection_timeout {
                        log::debug!("[context] {} idle, sending echo", id);
                        request::echo(&mut vc.send);
                        vc.echo_sent = Some(now);
                        vc.stats.echoes_sent += 1;
                        fx.flush.insert(id);
                    }
                }
                CircuitState::Aborting => {
                    if vc.abort_deadline.is_some_and(|deadline| now >= deadline) {
                        overdue.push(id);
                    }
                }
                CircuitState::Connecting | CircuitState::Closed => {}
            }
        }
        for id in overdue {
            log::warn!("[context] {} abort timed out, destroying", id);
            st.destroy_circuit(id, &mut fx);
        }
        st.retired.retain(|handle| !handle.is_finished());
        self.finish(st, fx);
    }

    pub fn circuit_count(&self) -> usize {
        self.locks.primary().circuits.len()
    }
}
