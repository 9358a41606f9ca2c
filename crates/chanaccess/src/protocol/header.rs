// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message header codec.
//!
//! Every message starts with a fixed 16-byte big-endian header:
//!
//! ```text
//! +---------+--------------+-----------+-------------+
//! | command | payload size | data type | count       |
//! |  u16    |  u16         |  u16      |  u16        |
//! +---------+--------------+-----------+-------------+
//! | parameter 1 (u32)      | parameter 2 (u32)       |
//! +------------------------+-------------------------+
//! ```
//!
//! Payloads or counts that do not fit in 16 bits use the extended form:
//! the payload size field holds `0xFFFF`, the count field holds `0`, and two
//! extra `u32` words (payload size, count) follow the standard header.
//! Payloads are always padded to a multiple of 8 bytes.

use crate::error::{Error, Result};

/// Standard header size.
pub const HEADER_SIZE: usize = 16;

/// Size of the extension words appended in the large-array form.
pub const EXTENSION_SIZE: usize = 8;

/// Header size when the extended form is in use.
pub const EXTENDED_HEADER_SIZE: usize = HEADER_SIZE + EXTENSION_SIZE;

/// Payload-size marker announcing the extended form.
pub const EXTENDED_MARKER: u16 = 0xFFFF;

/// Round a payload length up to the 8-byte wire alignment.
pub const fn align8(len: usize) -> usize {
    (len + 7) & !7
}

/// Decoded message header.
///
/// `param1` and `param2` are the two correlation fields; their meaning
/// depends on the command (channel id, server id, I/O id or status).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub command: u16,
    pub payload_size: u32,
    pub data_type: u16,
    pub count: u32,
    pub param1: u32,
    pub param2: u32,
}

impl MessageHeader {
    /// Header with only the command set.
    pub fn new(command: u16) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    pub fn with_type(mut self, data_type: u16, count: u32) -> Self {
        self.data_type = data_type;
        self.count = count;
        self
    }

    pub fn with_params(mut self, param1: u32, param2: u32) -> Self {
        self.param1 = param1;
        self.param2 = param2;
        self
    }

    /// Whether this header needs the extended (large array) encoding.
    pub fn is_extended(&self) -> bool {
        self.payload_size >= u32::from(EXTENDED_MARKER) || self.count >= u32::from(EXTENDED_MARKER)
    }

    /// Number of bytes `encode_into` appends.
    pub fn encoded_len(&self) -> usize {
        if self.is_extended() {
            EXTENDED_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Append the header in wire order.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.command.to_be_bytes());
        if self.is_extended() {
            buf.extend_from_slice(&EXTENDED_MARKER.to_be_bytes());
            buf.extend_from_slice(&self.data_type.to_be_bytes());
            buf.extend_from_slice(&0u16.to_be_bytes());
            buf.extend_from_slice(&self.param1.to_be_bytes());
            buf.extend_from_slice(&self.param2.to_be_bytes());
            buf.extend_from_slice(&self.payload_size.to_be_bytes());
            buf.extend_from_slice(&self.count.to_be_bytes());
        } else {
            buf.extend_from_slice(&(self.payload_size as u16).to_be_bytes());
            buf.extend_from_slice(&self.data_type.to_be_bytes());
            buf.extend_from_slice(&(self.count as u16).to_be_bytes());
            buf.extend_from_slice(&self.param1.to_be_bytes());
            buf.extend_from_slice(&self.param2.to_be_bytes());
        }
    }

    /// Decode the standard 16 bytes.
    ///
    /// Returns the header and whether the extension words follow. When they
    /// do, `payload_size` and `count` are placeholders until
    /// [`MessageHeader::apply_extension`] is called.
    pub fn decode_standard(bytes: &[u8; HEADER_SIZE]) -> (Self, bool) {
        let command = u16::from_be_bytes([bytes[0], bytes[1]]);
        let payload_size = u16::from_be_bytes([bytes[2], bytes[3]]);
        let data_type = u16::from_be_bytes([bytes[4], bytes[5]]);
        let count = u16::from_be_bytes([bytes[6], bytes[7]]);
        let param1 = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let param2 = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let extended = payload_size == EXTENDED_MARKER && count == 0;
        let header = Self {
            command,
            payload_size: u32::from(payload_size),
            data_type,
            count: u32::from(count),
            param1,
            param2,
        };
        (header, extended)
    }

    /// Fill in payload size and count from the extension words.
    pub fn apply_extension(&mut self, bytes: &[u8; EXTENSION_SIZE]) {
        self.payload_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.count = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    }

    /// Decode a complete header (standard or extended) from the front of a slice.
    ///
    /// Returns the header and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        let standard: &[u8; HEADER_SIZE] = bytes
            .get(..HEADER_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| Error::ProtocolViolation("truncated message header".into()))?;
        let (mut header, extended) = Self::decode_standard(standard);
        if !extended {
            return Ok((header, HEADER_SIZE));
        }
        let ext: &[u8; EXTENSION_SIZE] = bytes
            .get(HEADER_SIZE..EXTENDED_HEADER_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| Error::ProtocolViolation("truncated extended header".into()))?;
        header.apply_extension(ext);
        Ok((header, EXTENDED_HEADER_SIZE))
    }
}

/// Append a complete message: header, payload, and zero padding.
///
/// The header's `payload_size` is overwritten with the padded length.
pub fn encode_message(buf: &mut Vec<u8>, mut header: MessageHeader, payload: &[u8]) {
    let padded = align8(payload.len());
    header.payload_size = padded as u32;
    buf.reserve(header.encoded_len() + padded);
    header.encode_into(buf);
    buf.extend_from_slice(payload);
    buf.resize(buf.len() + (padded - payload.len()), 0);
}

/// Encode a nul-terminated string payload (names, host and user strings).
pub fn string_payload(s: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(s.len() + 1);
    payload.extend_from_slice(s.as_bytes());
    payload.push(0);
    payload
}
