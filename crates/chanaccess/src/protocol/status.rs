// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel-access status codes.
//!
//! Every status travels on the wire as a `u32` that packs a message number
//! and a severity:
//!
//! ```text
//! +----------------------------+----------+
//! | message number (bits 3..)  | severity |
//! +----------------------------+----------+
//!                               bits 0..2
//! ```
//!
//! Bit 0 of the severity is the success bit. Asynchronous failures are
//! reported to callbacks with one of these codes; synchronous failures use
//! [`crate::Error`] and map onto a status through [`crate::Error::status`].

use std::fmt;

/// Severity extracted from the low three bits of a status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Unsuccessful, but recoverable
    Warning,
    /// Successful completion
    Success,
    /// Failed, operation not completed
    Error,
    /// Successful, informational
    Info,
    /// Fatal, context is unusable
    Severe,
    /// Error and severe bits together
    Fatal,
    /// Reserved severity bits
    Unknown(u8),
}

/// Encoded channel-access status.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u32);

impl Status {
    pub const NORMAL: Status = Status(1);
    pub const ALLOCMEM: Status = Status(48);
    pub const TOLARGE: Status = Status(72);
    pub const TIMEOUT: Status = Status(80);
    pub const NOSUPPORT: Status = Status(88);
    pub const BADTYPE: Status = Status(114);
    pub const INTERNAL: Status = Status(142);
    pub const GETFAIL: Status = Status(152);
    pub const PUTFAIL: Status = Status(160);
    pub const ADDFAIL: Status = Status(168);
    pub const BADCOUNT: Status = Status(176);
    pub const DISCONN: Status = Status(192);
    pub const DBLCHNL: Status = Status(200);
    pub const EMPTYSTR: Status = Status(280);
    pub const BADMASK: Status = Status(330);
    pub const BADSYNCGRP: Status = Status(354);
    pub const NORDACCESS: Status = Status(368);
    pub const NOWTACCESS: Status = Status(376);
    pub const BADCHID: Status = Status(410);
    pub const BADFUNCPTR: Status = Status(418);
    pub const UNAVAILINSERV: Status = Status(432);
    pub const CHANDESTROY: Status = Status(440);
    pub const BADPRIORITY: Status = Status(450);
    pub const UNRESPTMO: Status = Status(480);

    const SEVERITY_MASK: u32 = 0x07;
    const SUCCESS_MASK: u32 = 0x01;
    const MSG_NO_SHIFT: u32 = 3;

    /// Wrap a raw status received from a server.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Message number (index into the message table).
    pub const fn message_number(self) -> u32 {
        self.0 >> Self::MSG_NO_SHIFT
    }

    pub fn severity(self) -> Severity {
        match (self.0 & Self::SEVERITY_MASK) as u8 {
            0 => Severity::Warning,
            1 => Severity::Success,
            2 => Severity::Error,
            3 => Severity::Info,
            4 => Severity::Severe,
            6 => Severity::Fatal,
            other => Severity::Unknown(other),
        }
    }

    /// True when the success bit is set.
    pub const fn is_success(self) -> bool {
        self.0 & Self::SUCCESS_MASK != 0
    }

    /// Human readable message for the code.
    pub fn message(self) -> &'static str {
        match self.message_number() {
            0 => "Normal successful completion",
            6 => "Unable to allocate additional dynamic memory",
            9 => "The requested transfer is greater than available memory or EPICS_CA_MAX_ARRAY_BYTES",
            10 => "User specified timeout on IO operation expired",
            11 => "Sorry, that feature is planned but not supported at this time",
            14 => "The data type specifed is invalid",
            17 => "Channel Access Internal Failure",
            19 => "Could not perform a database value get for that channel",
            20 => "Could not perform a database value put for that channel",
            21 => "Could not perform a database event add for that channel",
            22 => "Count requested inappropriate for that channel",
            24 => "Virtual circuit disconnect",
            25 => "Identical process variable names on multiple servers",
            35 => "Empty PV name string",
            41 => "Invalid event selection mask",
            44 => "Invalid synchronous group identifier",
            46 => "Read access denied",
            47 => "Write access denied",
            51 => "Invalid channel identifier",
            52 => "Invalid function pointer",
            54 => "Not supported by attached service",
            55 => "User destroyed channel",
            56 => "Invalid channel priority",
            60 => "Virtual circuit unresponsive",
            _ => "Unrecognized status code",
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::NORMAL
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({}: {:?})", self.0, self.severity())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.message(), self.0)
    }
}
