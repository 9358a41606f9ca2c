// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pool statistics, `show` reports and table self-test.

use std::fmt::Write as _;

use super::state::ContextState;
use super::ContextCore;
use crate::channel::ChannelState;
use crate::circuit::CircuitId;
use crate::pool::{BufferStats, PoolStats};

/// Occupancy of every pool, plus lock instrumentation.
#[derive(Clone, Debug)]
pub struct ContextStats {
    pub channels: PoolStats,
    pub reads: PoolStats,
    pub writes: PoolStats,
    pub subscriptions: PoolStats,
    pub circuits: PoolStats,
    pub sync_groups: PoolStats,
    pub small_buffers: BufferStats,
    pub large_buffers: BufferStats,
    /// Callback lock taken while holding the primary lock
    pub lock_violations: u64,
}

impl ContextCore {
    pub fn pool_stats(&self) -> ContextStats {
        let st = self.locks.primary();
        ContextStats {
            channels: st.channels.stats(),
            reads: st.ios.read_stats(),
            writes: st.ios.write_stats(),
            subscriptions: st.ios.subscription_stats(),
            circuits: st.circuits.stats(),
            sync_groups: st.groups.stats(),
            small_buffers: self.buffers.small_stats(),
            large_buffers: self.buffers.large_stats(),
            lock_violations: self.locks.violations(),
        }
    }

    /// Human-readable state report. Level 0 is a summary; 1 adds circuits,
    /// 2 channels, 3 outstanding I/O.
    pub fn show(&self, level: u32) -> String {
        let stats = self.pool_stats();
        let st = self.locks.primary();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "context: up {:?}, {} channel(s), {} circuit(s), {} request(s), {} beacon source(s){}",
            self.start.elapsed(),
            st.channels.len(),
            st.circuits.len(),
            st.ios.len(),
            st.beacons.len(),
            if st.shutdown { ", shut down" } else { "" }
        );
        if level == 0 {
            return out;
        }

        let _ = writeln!(
            out,
            "pools: channels {}/{} reads {}/{} writes {}/{} subscriptions {}/{} groups {}/{}",
            stats.channels.in_use,
            stats.channels.capacity,
            stats.reads.in_use,
            stats.reads.capacity,
            stats.writes.in_use,
            stats.writes.capacity,
            stats.subscriptions.in_use,
            stats.subscriptions.capacity,
            stats.sync_groups.in_use,
            stats.sync_groups.capacity,
        );
        let _ = writeln!(
            out,
            "buffers: small {} free of {}, large {} free of {} ({} exhausted)",
            stats.small_buffers.available,
            stats.small_buffers.created,
            stats.large_buffers.available,
            stats.large_buffers.created,
            stats.small_buffers.exhausted + stats.large_buffers.exhausted,
        );
        for (_, vc) in st.circuits.iter() {
            let _ = writeln!(
                out,
                "  {} {} priority {} level {} minor {} {:?}: {} channel(s), {} queued byte(s), {} received, {} violation(s)",
                vc.id,
                vc.server.addr,
                vc.server.priority.value(),
                vc.service_level,
                vc.minor.0,
                vc.state,
                vc.channels.len(),
                vc.send.len(),
                vc.stats.messages_received,
                vc.stats.protocol_violations,
            );
        }
        if level == 1 {
            return out;
        }

        for (_, ch) in st.channels.iter() {
            let _ = writeln!(
                out,
                "  {} '{}' {:?} on {} type {} count {} access {}{}",
                ch.id,
                ch.name,
                ch.state,
                ch.circuit.map_or_else(|| "-".to_string(), |c| c.to_string()),
                ch.native_type.map_or("-", |t| t.name()),
                ch.native_count,
                if ch.access.read { "r" } else { "-" },
                if ch.access.write { "w" } else { "-" },
            );
            if level >= 3 {
                for id in &ch.ios {
                    if let Some(io) = st.ios.describe(*id) {
                        let _ = writeln!(out, "    {} {:?} {} x{}", io.id, io.kind, io.dbr.name(), io.count);
                    }
                }
            }
        }
        out
    }

    /// Cross-check the tables. Returns one line per inconsistency.
    pub fn self_test(&self) -> Vec<String> {
        let st = self.locks.primary();
        let problems = check_tables(&st);
        for problem in &problems {
            log::error!("[context] self-test: {}", problem);
        }
        problems
    }
}

fn check_tables(st: &ContextState) -> Vec<String> {
    let mut problems = Vec::new();

    for (id, ch) in st.channels.iter() {
        if ch.id.0 != id {
            problems.push(format!("channel slot {} holds {}", id, ch.id));
        }
        match ch.circuit {
            Some(circuit) => match st.circuits.get(circuit.0) {
                Some(vc) if vc.channels.contains(&ch.id) => {}
                Some(_) => problems.push(format!("{} not listed by its {}", ch.id, circuit)),
                None => problems.push(format!("{} bound to missing {}", ch.id, circuit)),
            },
            None => {
                if ch.state == ChannelState::Connected {
                    problems.push(format!("{} connected without a circuit", ch.id));
                }
            }
        }
        for io in &ch.ios {
            if st.ios.channel_of(*io) != Some(ch.id) {
                problems.push(format!("{} lists {} owned elsewhere", ch.id, io));
            }
        }
    }

    for io in st.ios.ids() {
        match st.ios.channel_of(io).and_then(|c| st.channels.get(c.0)) {
            Some(ch) if ch.ios.contains(&io) => {}
            Some(ch) => problems.push(format!("{} not listed by {}", io, ch.id)),
            None => problems.push(format!("{} owned by a missing channel", io)),
        }
    }

    for (id, vc) in st.circuits.iter() {
        let circuit = CircuitId(id);
        for channel in &vc.channels {
            if st.channels.get(channel.0).and_then(|ch| ch.circuit) != Some(circuit) {
                problems.push(format!("{} lists {} bound elsewhere", circuit, channel));
            }
        }
        if st.servers.get(&vc.server) != Some(&circuit) {
            problems.push(format!("{} missing from the server map", circuit));
        }
    }
    for (server, circuit) in &st.servers {
        if !st.circuits.contains(circuit.0) {
            problems.push(format!("server {} maps to missing {}", server.addr, circuit));
        }
    }

    for (id, sg) in st.groups.iter() {
        let pending = sg
            .members
            .values()
            .filter(|m| m.status == crate::sync_group::MemberStatus::Pending)
            .count();
        if pending != sg.outstanding {
            problems.push(format!(
                "sg{} counts {} outstanding but has {} pending member(s)",
                id, sg.outstanding, pending
            ));
        }
    }
    problems
}
