// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server beacon table.
//!
//! Servers announce themselves periodically. Each address gets an entry
//! tracking its last beacon, sequence number and a running average of the
//! beacon period. Every beacon is classified:
//!
//! - sequence (revision >= 10): duplicate routes and small skips are
//!   anomalies and otherwise ignored; a large regression means the server
//!   restarted
//! - period: a beacon much later than expected means the server was
//!   unreachable, one much earlier means it rebooted
//!
//! Classification is diagnostic. The context only uses
//! [`BeaconVerdict::NetworkChange`] to speed up reconnection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Outcome of one beacon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeaconVerdict {
    NoChange,
    /// Irregular beacon; counted, no action
    Anomaly,
    /// Server (re)appeared; reconnection should be expedited
    NetworkChange,
}

/// Sequence numbers this far behind the last one are duplicates.
const DUPLICATE_WINDOW: u32 = 256;

/// First revision carrying a beacon sequence number.
const SEQUENCE_REVISION: u16 = 10;

/// Liveness record for one server address.
#[derive(Clone, Debug)]
pub struct BeaconEntry {
    pub addr: SocketAddr,
    pub last_beacon: Instant,
    pub last_sequence: Option<u32>,
    pub revision: u16,
    /// Running average, `None` until two beacons arrived
    pub average_period: Option<Duration>,
    pub beacons: u64,
    pub sequence_anomalies: u64,
    pub period_anomalies: u64,
}

impl BeaconEntry {
    fn new(addr: SocketAddr, timestamp: Instant, sequence: u32, revision: u16) -> Self {
        Self {
            addr,
            last_beacon: timestamp,
            last_sequence: (revision >= SEQUENCE_REVISION).then_some(sequence),
            revision,
            average_period: None,
            beacons: 1,
            sequence_anomalies: 0,
            period_anomalies: 0,
        }
    }

    /// Sequence check. `Some` short-circuits period classification.
    fn check_sequence(&mut self, sequence: u32, revision: u16) -> Option<BeaconVerdict> {
        if revision < SEQUENCE_REVISION {
            self.last_sequence = None;
            return None;
        }
        let Some(last) = self.last_sequence.replace(sequence) else {
            return None;
        };

        let behind = last.wrapping_sub(sequence);
        let ahead = sequence.wrapping_sub(last);
        if behind <= DUPLICATE_WINDOW {
            // includes equal sequence numbers
            self.last_sequence = Some(last);
            self.sequence_anomalies += 1;
            log::trace!("[beacon] {} duplicate sequence {} (last {})", self.addr, sequence, last);
            return Some(BeaconVerdict::Anomaly);
        }
        if (2..=3).contains(&ahead) {
            self.sequence_anomalies += 1;
            log::trace!("[beacon] {} skipped to sequence {}", self.addr, sequence);
            return Some(BeaconVerdict::Anomaly);
        }
        // past the duplicate window but less than half the sequence space
        // behind; anything further is a forward step across the wrap
        if behind < 1 << 31 {
            log::debug!("[beacon] {} sequence regressed {} -> {}: restart", self.addr, last, sequence);
            self.average_period = None;
            return Some(BeaconVerdict::NetworkChange);
        }
        None
    }

    fn check_period(&mut self, timestamp: Instant, program_start: Instant) -> BeaconVerdict {
        let current = timestamp.saturating_duration_since(self.last_beacon);

        let Some(average) = self.average_period else {
            self.average_period = Some(current);
            // A period shorter than our own lifetime means the server came
            // up after we started listening.
            let running = timestamp.saturating_duration_since(program_start);
            return if current < running {
                BeaconVerdict::NetworkChange
            } else {
                BeaconVerdict::NoChange
            };
        };

        let verdict = if current >= average.mul_f64(1.25) {
            self.period_anomalies += 1;
            if current >= average.mul_f64(3.25) {
                log::debug!("[beacon] {} back after {:?} (avg {:?})", self.addr, current, average);
                BeaconVerdict::NetworkChange
            } else {
                BeaconVerdict::Anomaly
            }
        } else if current <= average.mul_f64(0.8) {
            self.period_anomalies += 1;
            log::debug!("[beacon] {} early beacon {:?} (avg {:?}): reboot", self.addr, current, average);
            BeaconVerdict::NetworkChange
        } else {
            BeaconVerdict::NoChange
        };

        self.average_period = Some(current.mul_f64(0.125) + average.mul_f64(0.875));
        verdict
    }
}

/// All known servers, keyed by beacon address.
#[derive(Debug, Default)]
pub struct BeaconTable {
    entries: HashMap<SocketAddr, BeaconEntry>,
    network_changes: u64,
}

impl BeaconTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one beacon and classify it.
    pub fn update(
        &mut self,
        addr: SocketAddr,
        timestamp: Instant,
        sequence: u32,
        revision: u16,
        program_start: Instant,
    ) -> BeaconVerdict {
        let Some(entry) = self.entries.get_mut(&addr) else {
            self.entries
                .insert(addr, BeaconEntry::new(addr, timestamp, sequence, revision));
            log::debug!("[beacon] first beacon from {}", addr);
            return BeaconVerdict::NoChange;
        };

        entry.beacons += 1;
        entry.revision = revision;
        let verdict = match entry.check_sequence(sequence, revision) {
            Some(BeaconVerdict::Anomaly) => return BeaconVerdict::Anomaly,
            Some(verdict) => verdict,
            None => entry.check_period(timestamp, program_start),
        };
        entry.last_beacon = timestamp;

        if verdict == BeaconVerdict::NetworkChange {
            self.network_changes += 1;
        }
        verdict
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&BeaconEntry> {
        self.entries.get(addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Network changes detected since the table was created.
    pub fn network_changes(&self) -> u64 {
        self.network_changes
    }

    pub fn iter(&self) -> impl Iterator<Item = &BeaconEntry> {
        self.entries.values()
    }
}
