// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dialing servers.
//!
//! The context never opens sockets itself; it asks a [`CircuitConnector`]
//! for a stream. [`TcpConnector`] is the default.

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use super::stream::BoxedByteStream;

/// Opens the byte stream behind a new circuit.
///
/// Called from the circuit's receive thread with no context lock held, so
/// implementations may block up to `timeout`.
pub trait CircuitConnector: Send + Sync {
    fn connect(&self, server: SocketAddr, timeout: Duration) -> io::Result<BoxedByteStream>;
}

/// Plain TCP connector.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// Keep-alive idle time (None = disabled)
    pub keepalive: Option<Duration>,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl TcpConnector {
    pub fn new(nodelay: bool, keepalive: bool) -> Self {
        Self {
            nodelay,
            keepalive: keepalive.then_some(Duration::from_secs(60)),
        }
    }
}

impl CircuitConnector for TcpConnector {
    fn connect(&self, server: SocketAddr, timeout: Duration) -> io::Result<BoxedByteStream> {
        let socket = Socket::new(Domain::for_address(server), Type::STREAM, Some(Protocol::TCP))?;
        socket.connect_timeout(&server.into(), timeout)?;

        let stream: TcpStream = socket.into();
        let sock = SockRef::from(&stream);
        sock.set_nodelay(self.nodelay)?;
        if let Some(idle) = self.keepalive {
            sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
        }

        log::debug!("[circuit] connected to {}", server);
        Ok(Box::new(stream))
    }
}
