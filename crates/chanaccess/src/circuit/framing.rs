// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive-side message reassembly.
//!
//! TCP delivers a byte stream with no message boundaries. The decoder keeps
//! partial read state across calls so a read timeout in the middle of a
//! frame loses nothing:
//!
//! ```text
//! Header(16) --extended?--> Extension(8) --> Body(payload size) --> Frame
//!                                         \-> Discard (no buffer) -> Frame(Discarded)
//! ```
//!
//! Bodies are read into pooled receive buffers. A body larger than the
//! receive limit is a protocol violation (the circuit cannot resync), while
//! a body that merely finds its pool empty is skipped and surfaced as
//! [`Payload::Discarded`] so the matching request can fail with an
//! allocation status.

use std::io::{self, Read};
use std::ops::Deref;

use crate::error::{Error, Result};
use crate::pool::{PooledBuffer, ReceiveBuffers};
use crate::protocol::header::{EXTENSION_SIZE, HEADER_SIZE};
use crate::protocol::MessageHeader;

/// Message body handed to the dispatcher.
#[derive(Debug, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// Body read into a pooled receive buffer
    Pooled(PooledBuffer),
    /// Body supplied by the caller
    Owned(Vec<u8>),
    /// Body skipped because no receive buffer was free
    Discarded,
}

impl Payload {
    pub fn is_discarded(&self) -> bool {
        matches!(self, Payload::Discarded)
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Payload::Pooled(buf) => buf,
            Payload::Owned(buf) => buf,
            Payload::Empty | Payload::Discarded => &[],
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(body: Vec<u8>) -> Self {
        if body.is_empty() {
            Payload::Empty
        } else {
            Payload::Owned(body)
        }
    }
}

/// One complete inbound message.
#[derive(Debug)]
pub struct Frame {
    pub header: MessageHeader,
    pub body: Payload,
}

#[derive(Debug, Default)]
enum ReadState {
    #[default]
    Idle,
    Header {
        bytes_read: usize,
    },
    Extension {
        header: MessageHeader,
        bytes_read: usize,
    },
    Body {
        header: MessageHeader,
        buf: PooledBuffer,
        bytes_read: usize,
    },
    Discard {
        header: MessageHeader,
        remaining: usize,
    },
}

/// Incremental frame decoder for one circuit.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: ReadState,
    scratch: [u8; HEADER_SIZE],
    frames_decoded: u64,
    bytes_decoded: u64,
    frames_discarded: u64,
}

enum Step {
    Progress(usize),
    Pending,
}

/// Read once, folding timeouts into `Pending`.
fn read_some<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8], at_boundary: bool) -> Result<Step> {
    loop {
        match reader.read(buf) {
            Ok(0) => {
                let msg = if at_boundary {
                    "connection closed"
                } else {
                    "connection closed mid-frame"
                };
                return Err(Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, msg)));
            }
            Ok(n) => return Ok(Step::Progress(n)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                return Ok(Step::Pending)
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Frames whose body was skipped for lack of a buffer.
    pub fn frames_discarded(&self) -> u64 {
        self.frames_discarded
    }

    /// Whether a frame is partially read.
    pub fn is_partial(&self) -> bool {
        !matches!(self.state, ReadState::Idle | ReadState::Header { bytes_read: 0 })
    }

    /// Try to decode one frame.
    ///
    /// - `Ok(Some(frame))`: a frame is complete
    /// - `Ok(None)`: the reader timed out; call again later
    /// - `Err(_)`: connection lost or unrecoverable framing error
    pub fn decode<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        buffers: &ReceiveBuffers,
    ) -> Result<Option<Frame>> {
        loop {
            match std::mem::take(&mut self.state) {
                ReadState::Idle => {
                    self.state = ReadState::Header { bytes_read: 0 };
                }

                ReadState::Header { bytes_read } => {
                    let step = read_some(reader, &mut self.scratch[bytes_read..], bytes_read == 0);
                    let n = match step {
                        Ok(Step::Progress(n)) => n,
                        Ok(Step::Pending) => {
                            self.state = ReadState::Header { bytes_read };
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    };
                    let total = bytes_read + n;
                    if total < HEADER_SIZE {
                        self.state = ReadState::Header { bytes_read: total };
                        continue;
                    }
                    let (header, extended) = MessageHeader::decode_standard(&self.scratch);
                    if extended {
                        self.state = ReadState::Extension {
                            header,
                            bytes_read: 0,
                        };
                    } else if let Some(frame) = self.begin_body(header, buffers)? {
                        return Ok(Some(frame));
                    }
                }

                ReadState::Extension { header, bytes_read } => {
                    let step = read_some(reader, &mut self.scratch[bytes_read..EXTENSION_SIZE], false);
                    let n = match step {
                        Ok(Step::Progress(n)) => n,
                        Ok(Step::Pending) => {
                            self.state = ReadState::Extension { header, bytes_read };
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    };
                    let total = bytes_read + n;
                    if total < EXTENSION_SIZE {
                        self.state = ReadState::Extension {
                            header,
                            bytes_read: total,
                        };
                        continue;
                    }
                    let mut header = header;
                    let mut ext = [0u8; EXTENSION_SIZE];
                    ext.copy_from_slice(&self.scratch[..EXTENSION_SIZE]);
                    header.apply_extension(&ext);
                    if let Some(frame) = self.begin_body(header, buffers)? {
                        return Ok(Some(frame));
                    }
                }

                ReadState::Body {
                    header,
                    mut buf,
                    bytes_read,
                } => {
                    let expected = buf.len();
                    let step = read_some(reader, &mut buf[bytes_read..expected], false);
                    let n = match step {
                        Ok(Step::Progress(n)) => n,
                        Ok(Step::Pending) => {
                            self.state = ReadState::Body {
                                header,
                                buf,
                                bytes_read,
                            };
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    };
                    let total = bytes_read + n;
                    if total < expected {
                        self.state = ReadState::Body {
                            header,
                            buf,
                            bytes_read: total,
                        };
                        continue;
                    }
                    self.frames_decoded += 1;
                    self.bytes_decoded += expected as u64;
                    return Ok(Some(Frame {
                        header,
                        body: Payload::Pooled(buf),
                    }));
                }

                ReadState::Discard { header, remaining } => {
                    let chunk = remaining.min(self.scratch.len());
                    let step = read_some(reader, &mut self.scratch[..chunk], false);
                    let n = match step {
                        Ok(Step::Progress(n)) => n,
                        Ok(Step::Pending) => {
                            self.state = ReadState::Discard { header, remaining };
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    };
                    let remaining = remaining - n;
                    if remaining > 0 {
                        self.state = ReadState::Discard { header, remaining };
                        continue;
                    }
                    self.frames_discarded += 1;
                    return Ok(Some(Frame {
                        header,
                        body: Payload::Discarded,
                    }));
                }
            }
        }
    }

    /// Header complete: pick the next state. Returns a frame for empty bodies.
    fn begin_body(
        &mut self,
        header: MessageHeader,
        buffers: &ReceiveBuffers,
    ) -> Result<Option<Frame>> {
        let len = header.payload_size as usize;
        if len == 0 {
            self.frames_decoded += 1;
            return Ok(Some(Frame {
                header,
                body: Payload::Empty,
            }));
        }
        match buffers.acquire_for(len) {
            Ok(buf) => {
                self.state = ReadState::Body {
                    header,
                    buf,
                    bytes_read: 0,
                };
                Ok(None)
            }
            Err(Error::PoolExhausted(pool)) => {
                log::warn!(
                    "[circuit] {} exhausted, discarding {} byte body of command {}",
                    pool,
                    len,
                    header.command
                );
                self.state = ReadState::Discard {
                    header,
                    remaining: len,
                };
                Ok(None)
            }
            Err(e) => Err(Error::ProtocolViolation(format!(
                "command {} body of {} bytes rejected: {}",
                header.command, len, e
            ))),
        }
    }
}
