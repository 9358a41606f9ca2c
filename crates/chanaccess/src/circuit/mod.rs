// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Virtual circuits: one TCP connection to one server at one priority.
//!
//! A circuit owns its send buffer, the writer/control handles of its
//! stream, the set of channels bound to it, and echo/abort bookkeeping.
//! The receive side runs on a dedicated thread (see [`receiver`]); all
//! other fields are mutated only under the context's primary lock.
//!
//! ```text
//!             connected              error / echo timeout / shutdown
//! Connecting -----------> Connected -------------------------------> Aborting
//!      |                                                                 |
//!      +--------------------- dial failed -----------------------------> Closed
//!                                               receive thread exited or
//!                                               abort timeout elapsed
//! ```

pub mod connector;
pub mod framing;
pub mod priority;
pub(crate) mod receiver;
pub mod stream;

pub use connector::{CircuitConnector, TcpConnector};
pub use framing::{Frame, FrameDecoder, Payload};
pub use stream::{BoxedByteStream, ByteStream};

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::channel::{ChannelId, Priority};
use crate::protocol::MinorVersion;

/// Circuit handle, unique for the context lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircuitId(pub u32);

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vc{}", self.0)
    }
}

/// Server identity of a circuit: address plus channel priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServerId {
    pub addr: SocketAddr,
    pub priority: Priority,
}

/// Circuit lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Receive thread is dialing
    Connecting,
    /// Handshake sent, traffic flowing
    Connected,
    /// Unrecoverable error; waiting for the receive thread to exit
    Aborting,
    /// Removed from the context
    Closed,
}

/// When queued requests reach the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Buffer until `flush()` or the flush threshold
    #[default]
    Deferred,
    /// Flush after every request
    Immediate,
}

/// Per-circuit counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CircuitStats {
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub flushes: u64,
    pub echoes_sent: u64,
    pub protocol_violations: u32,
}

/// Writer half of a connected circuit. Leaf lock: never held while
/// acquiring a context lock.
pub(crate) type SharedWriter = Arc<Mutex<BoxedByteStream>>;

pub(crate) struct VirtualCircuit {
    pub(crate) id: CircuitId,
    pub(crate) server: ServerId,
    pub(crate) state: CircuitState,
    pub(crate) minor: MinorVersion,
    pub(crate) service_level: u8,
    pub(crate) send: Vec<u8>,
    /// A thread is writing this circuit's buffers.
    pub(crate) flushing: bool,
    pub(crate) writer: Option<SharedWriter>,
    pub(crate) control: Option<BoxedByteStream>,
    /// Channels bound to this circuit.
    pub(crate) channels: BTreeSet<ChannelId>,
    /// Bound channels whose CREATE_CHAN waits for the connection.
    pub(crate) create_pending: Vec<ChannelId>,
    pub(crate) last_receive: Instant,
    pub(crate) echo_sent: Option<Instant>,
    pub(crate) abort_deadline: Option<Instant>,
    pub(crate) receiver: Option<JoinHandle<()>>,
    pub(crate) stats: CircuitStats,
}

impl VirtualCircuit {
    pub(crate) fn new(id: CircuitId, server: ServerId, minor: MinorVersion, service_level: u8) -> Self {
        Self {
            id,
            server,
            state: CircuitState::Connecting,
            minor,
            service_level,
            send: Vec::new(),
            flushing: false,
            writer: None,
            control: None,
            channels: BTreeSet::new(),
            create_pending: Vec::new(),
            last_receive: Instant::now(),
            echo_sent: None,
            abort_deadline: None,
            receiver: None,
            stats: CircuitStats::default(),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == CircuitState::Connected
    }

    /// Mark the circuit unusable and unblock its receive thread.
    ///
    /// Idempotent. The circuit is removed later, by the receive thread on
    /// exit or by the timer once `deadline` passes.
    pub(crate) fn abort(&mut self, deadline: Instant, reason: &str) {
        if matches!(self.state, CircuitState::Aborting | CircuitState::Closed) {
            return;
        }
        log::error!("[circuit] {} to {} aborting: {}", self.id, self.server.addr, reason);
        self.state = CircuitState::Aborting;
        self.abort_deadline = Some(deadline);
        self.send.clear();
        self.shutdown_socket(Shutdown::Both);
    }

    pub(crate) fn shutdown_socket(&self, how: Shutdown) {
        if let Some(control) = &self.control {
            if let Err(e) = control.shutdown(how) {
                log::debug!("[circuit] {} shutdown: {}", self.id, e);
            }
        }
    }
}

impl fmt::Debug for VirtualCircuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualCircuit")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("state", &self.state)
            .field("minor", &self.minor)
            .field("channels", &self.channels.len())
            .field("pending_send", &self.send.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::stream::mock::MockStream;
    use super::*;
    use std::io::Read;
    use std::time::Duration;

    fn server() -> ServerId {
        ServerId {
            addr: SocketAddr::from(([127, 0, 0, 1], 5064)),
            priority: Priority::DEFAULT,
        }
    }

    #[test]
    fn test_abort_is_idempotent_and_closes_socket() {
        let (client, mut peer) = MockStream::pair();
        let mut vc = VirtualCircuit::new(CircuitId(1), server(), MinorVersion(13), 50);
        vc.control = Some(Box::new(client));
        vc.state = CircuitState::Connected;
        vc.send.extend_from_slice(b"pending");

        let deadline = Instant::now() + Duration::from_secs(1);
        vc.abort(deadline, "test");
        assert_eq!(vc.state, CircuitState::Aborting);
        assert!(vc.send.is_empty());
        vc.abort(deadline + Duration::from_secs(5), "again");
        assert_eq!(vc.abort_deadline, Some(deadline));

        let mut buf = [0u8; 4];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }
}
