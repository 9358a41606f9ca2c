// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minor protocol revision and the features it gates.

/// Minor revision advertised by this client.
pub const CA_MINOR_PROTOCOL_REVISION: u16 = 13;

/// Revision assumed until the server's VERSION reply arrives.
pub const CA_UNKNOWN_MINOR_REVISION: u16 = 0;

/// Negotiated minor protocol revision of a circuit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinorVersion(pub u16);

impl MinorVersion {
    pub const CLIENT: MinorVersion = MinorVersion(CA_MINOR_PROTOCOL_REVISION);

    pub fn supports_write_notify(self) -> bool {
        self.0 >= 1
    }

    pub fn supports_access_rights(self) -> bool {
        self.0 >= 4
    }

    pub fn supports_client_host_name(self) -> bool {
        self.0 >= 4
    }

    pub fn read_notify_has_status(self) -> bool {
        self.0 >= 8
    }

    pub fn supports_large_arrays(self) -> bool {
        self.0 >= 9
    }

    pub fn has_beacon_sequence(self) -> bool {
        self.0 >= 10
    }

    pub fn supports_priority(self) -> bool {
        self.0 >= 11
    }

    pub fn supports_create_chan_fail(self) -> bool {
        self.0 >= 11
    }

    /// Count zero means "whatever the server holds".
    pub fn supports_dynamic_count(self) -> bool {
        self.0 >= 13
    }
}
