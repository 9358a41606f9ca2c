// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel-access wire protocol (client subset).
//!
//! All multi-byte fields are big-endian. See [`header`] for the frame layout.

pub mod command;
pub mod dbr;
pub mod header;
pub mod request;
pub mod status;
pub mod version;

pub use dbr::{DbrClass, DbrType};
pub use header::{align8, MessageHeader, EXTENDED_HEADER_SIZE, HEADER_SIZE};
pub use status::{Severity, Status};
pub use version::{MinorVersion, CA_MINOR_PROTOCOL_REVISION};
