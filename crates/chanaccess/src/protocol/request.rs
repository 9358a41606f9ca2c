// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builders for every client-to-server message the core sends.
//!
//! Each builder appends one complete, padded message to a circuit send
//! buffer. Callers validate type/count/length beforehand; the builders only
//! lay out bytes.

use super::command;
use super::dbr::DbrType;
use super::header::{encode_message, string_payload, MessageHeader};
use super::version::CA_MINOR_PROTOCOL_REVISION;

/// Size of the EVENT_ADD body: three f32 deadbands, u16 mask, u16 pad.
pub const EVENT_ADD_BODY_SIZE: usize = 16;

/// VERSION: priority in the data type field, client minor revision in count.
pub fn version(buf: &mut Vec<u8>, priority: u8) {
    let header = MessageHeader::new(command::VERSION)
        .with_type(u16::from(priority), u32::from(CA_MINOR_PROTOCOL_REVISION));
    encode_message(buf, header, &[]);
}

pub fn host_name(buf: &mut Vec<u8>, name: &str) {
    encode_message(buf, MessageHeader::new(command::HOST_NAME), &string_payload(name));
}

pub fn client_name(buf: &mut Vec<u8>, name: &str) {
    encode_message(
        buf,
        MessageHeader::new(command::CLIENT_NAME),
        &string_payload(name),
    );
}

/// CREATE_CHAN: client channel id in param1, client minor revision in param2.
pub fn create_channel(buf: &mut Vec<u8>, cid: u32, name: &str) {
    let header = MessageHeader::new(command::CREATE_CHAN)
        .with_params(cid, u32::from(CA_MINOR_PROTOCOL_REVISION));
    encode_message(buf, header, &string_payload(name));
}

pub fn read_notify(buf: &mut Vec<u8>, sid: u32, ioid: u32, dbr: DbrType, count: u32) {
    let header = MessageHeader::new(command::READ_NOTIFY)
        .with_type(dbr.code(), count)
        .with_params(sid, ioid);
    encode_message(buf, header, &[]);
}

/// Unconfirmed WRITE: the server echoes nothing, param2 carries the cid.
pub fn write(buf: &mut Vec<u8>, sid: u32, cid: u32, dbr: DbrType, count: u32, value: &[u8]) {
    let header = MessageHeader::new(command::WRITE)
        .with_type(dbr.code(), count)
        .with_params(sid, cid);
    encode_message(buf, header, value);
}

pub fn write_notify(
    buf: &mut Vec<u8>,
    sid: u32,
    ioid: u32,
    dbr: DbrType,
    count: u32,
    value: &[u8],
) {
    let header = MessageHeader::new(command::WRITE_NOTIFY)
        .with_type(dbr.code(), count)
        .with_params(sid, ioid);
    encode_message(buf, header, value);
}

pub fn event_add(buf: &mut Vec<u8>, sid: u32, subid: u32, dbr: DbrType, count: u32, mask: u16) {
    let header = MessageHeader::new(command::EVENT_ADD)
        .with_type(dbr.code(), count)
        .with_params(sid, subid);
    let mut body = [0u8; EVENT_ADD_BODY_SIZE];
    body[12..14].copy_from_slice(&mask.to_be_bytes());
    encode_message(buf, header, &body);
}

pub fn event_cancel(buf: &mut Vec<u8>, sid: u32, subid: u32, dbr: DbrType, count: u32) {
    let header = MessageHeader::new(command::EVENT_CANCEL)
        .with_type(dbr.code(), count)
        .with_params(sid, subid);
    encode_message(buf, header, &[]);
}

pub fn clear_channel(buf: &mut Vec<u8>, sid: u32, cid: u32) {
    let header = MessageHeader::new(command::CLEAR_CHANNEL).with_params(sid, cid);
    encode_message(buf, header, &[]);
}

pub fn echo(buf: &mut Vec<u8>) {
    encode_message(buf, MessageHeader::new(command::ECHO), &[]);
}
