// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Beacon entry point.

use std::net::SocketAddr;
use std::time::Instant;

use super::delivery::Effects;
use super::ContextCore;
use crate::beacon::BeaconVerdict;
use crate::channel::ChannelState;
use crate::circuit::CircuitId;
use crate::protocol::request;

impl ContextCore {
    /// Record a beacon from `addr`.
    ///
    /// When the beacon signals a network change, outstanding searches are
    /// expedited and every idle circuit to that server gets an echo probe.
    pub fn beacon_notify(&self, addr: SocketAddr, timestamp: Instant, sequence: u32, revision: u16) -> BeaconVerdict {
        let mut st = self.locks.primary();
        let verdict = st.beacons.update(addr, timestamp, sequence, revision, self.start);
        if verdict != BeaconVerdict::NetworkChange || st.shutdown {
            return verdict;
        }

        log::debug!("[context] beacon anomaly from {}, expediting", addr);
        let mut fx = Effects::default();
        fx.expedite = st
            .channels
            .iter()
            .any(|(_, ch)| ch.state == ChannelState::Searching);
        for (id, vc) in st.circuits.iter_mut() {
            if vc.server.addr != addr || !vc.is_connected() || vc.echo_sent.is_some() {
                continue;
            }
            request::echo(&mut vc.send);
            vc.echo_sent = Some(timestamp);
            vc.stats.echoes_sent += 1;
            fx.flush.insert(CircuitId(id));
        }
        self.finish(st, fx);
        verdict
    }

    /// Network-change beacons seen since the context started.
    pub fn beacon_anomalies_since_program_start(&self) -> u64 {
        self.locks.primary().beacons.network_changes()
    }
}
