// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte stream abstraction under a virtual circuit.
//!
//! A circuit needs three handles on one connection: the receive thread's
//! reader, the writer used by flushes, and a control handle that can shut
//! the socket down from any thread to unblock the reader. `try_clone_stream`
//! provides the extra handles.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Blocking byte stream carrying one circuit.
pub trait ByteStream: Read + Write + Send {
    /// Shut down one or both directions. Takes `&self` so a control handle
    /// can interrupt a blocked reader.
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    /// Another handle on the same connection.
    fn try_clone_stream(&self) -> io::Result<BoxedByteStream>;
}

/// Type alias for a boxed ByteStream.
pub type BoxedByteStream = Box<dyn ByteStream>;

// ============================================================================
// TcpStream implementation
// ============================================================================

impl ByteStream for TcpStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }

    fn try_clone_stream(&self) -> io::Result<BoxedByteStream> {
        Ok(Box::new(self.try_clone()?))
    }
}

// ============================================================================
// Test mock stream
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
