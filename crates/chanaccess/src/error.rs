// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synchronous error type.
//!
//! Errors detected locally at request time are returned through [`Result`].
//! Failures that happen on the network are delivered to callbacks as a
//! [`Status`] instead; [`Error::status`] gives the status equivalent of a
//! local error so both paths share one vocabulary.

use std::fmt;

use crate::protocol::Status;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigurationError,
    Disconnected,
    UnsupportedByService,
    OutOfBounds,
    ProtocolViolation,
    Timeout,
    ResourceExhaustion,
    NoReadAccess,
    NoWriteAccess,
    BadChannel,
    ShutDown,
    Io,
}

/// Error returned by context operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Channel priority above the supported maximum (0-99).
    InvalidPriority(u32),
    /// Unknown DBR type code, or a type not valid for this request.
    BadType(u16),
    /// Element count not usable for this request (zero for a write).
    BadCount(u32),
    /// Channel name is empty.
    EmptyChannelName,
    /// Channel name exceeds the maximum length.
    ChannelNameTooLong(usize),
    /// A notify-based request or channel was given no notification target.
    MissingNotifyTarget,
    /// Subscription event mask selects no event class.
    BadEventMask(u16),
    /// Value buffer length disagrees with the declared type and count.
    BadValueLength { expected: usize, actual: usize },
    /// Unknown synchronous group id.
    BadSyncGroup(u32),
    /// Invalid client configuration.
    InvalidConfig(String),

    // ========================================================================
    // Binding Errors
    // ========================================================================
    /// Channel is not bound to a circuit and the request needs one.
    NotBound,
    /// Channel or its circuit is currently down.
    Disconnected,
    /// Feature not available on the negotiated protocol revision or provider.
    Unsupported(&'static str),
    /// Unknown channel id (destroyed or never created).
    BadChannel(u32),
    /// Read access denied by the server.
    NoReadAccess,
    /// Write access denied by the server.
    NoWriteAccess,

    // ========================================================================
    // Limit Errors
    // ========================================================================
    /// Element count exceeds the server-declared native count.
    OutOfBounds { requested: u32, limit: u32 },
    /// Transfer larger than the configured maximum array size.
    TooLarge { bytes: usize, limit: usize },
    /// A fixed-capacity pool has no free slot.
    PoolExhausted(&'static str),

    // ========================================================================
    // Runtime Errors
    // ========================================================================
    /// Malformed or inconsistent data from a server.
    ProtocolViolation(String),
    /// Blocking wait exceeded its deadline.
    Timeout,
    /// Socket error.
    Io(std::io::Error),
    /// Context was shut down.
    ShutDown,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPriority(_)
            | Error::BadType(_)
            | Error::BadCount(_)
            | Error::EmptyChannelName
            | Error::ChannelNameTooLong(_)
            | Error::MissingNotifyTarget
            | Error::BadEventMask(_)
            | Error::BadValueLength { .. }
            | Error::BadSyncGroup(_)
            | Error::InvalidConfig(_) => ErrorKind::ConfigurationError,
            Error::NotBound | Error::Unsupported(_) => ErrorKind::UnsupportedByService,
            Error::Disconnected => ErrorKind::Disconnected,
            Error::BadChannel(_) => ErrorKind::BadChannel,
            Error::NoReadAccess => ErrorKind::NoReadAccess,
            Error::NoWriteAccess => ErrorKind::NoWriteAccess,
            Error::OutOfBounds { .. } | Error::TooLarge { .. } => ErrorKind::OutOfBounds,
            Error::PoolExhausted(_) => ErrorKind::ResourceExhaustion,
            Error::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Error::Timeout => ErrorKind::Timeout,
            Error::Io(_) => ErrorKind::Io,
            Error::ShutDown => ErrorKind::ShutDown,
        }
    }

    /// Status code equivalent, as it would be reported to a callback.
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidPriority(_) => Status::BADPRIORITY,
            Error::BadType(_) => Status::BADTYPE,
            Error::BadCount(_) | Error::BadValueLength { .. } => Status::BADCOUNT,
            Error::EmptyChannelName | Error::ChannelNameTooLong(_) => Status::EMPTYSTR,
            Error::MissingNotifyTarget => Status::BADFUNCPTR,
            Error::BadEventMask(_) => Status::BADMASK,
            Error::BadSyncGroup(_) => Status::BADSYNCGRP,
            Error::InvalidConfig(_) | Error::ProtocolViolation(_) => Status::INTERNAL,
            Error::NotBound => Status::UNAVAILINSERV,
            Error::Unsupported(_) => Status::NOSUPPORT,
            Error::Disconnected | Error::Io(_) | Error::ShutDown => Status::DISCONN,
            Error::BadChannel(_) => Status::BADCHID,
            Error::NoReadAccess => Status::NORDACCESS,
            Error::NoWriteAccess => Status::NOWTACCESS,
            Error::OutOfBounds { .. } => Status::BADCOUNT,
            Error::TooLarge { .. } => Status::TOLARGE,
            Error::PoolExhausted(_) => Status::ALLOCMEM,
            Error::Timeout => Status::TIMEOUT,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Configuration
            Error::InvalidPriority(p) => write!(f, "Invalid channel priority: {} (must be 0-99)", p),
            Error::BadType(t) => write!(f, "Invalid DBR type: {}", t),
            Error::BadCount(c) => write!(f, "Invalid element count: {}", c),
            Error::EmptyChannelName => write!(f, "Empty channel name"),
            Error::ChannelNameTooLong(len) => write!(f, "Channel name too long: {} bytes", len),
            Error::MissingNotifyTarget => write!(f, "Missing notification target"),
            Error::BadEventMask(m) => write!(f, "Invalid event mask: {:#x}", m),
            Error::BadValueLength { expected, actual } => write!(
                f,
                "Value length mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            Error::BadSyncGroup(id) => write!(f, "Invalid synchronous group: {}", id),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            // Binding
            Error::NotBound => write!(f, "Channel not bound to a circuit"),
            Error::Disconnected => write!(f, "Channel disconnected"),
            Error::Unsupported(what) => write!(f, "Not supported by attached service: {}", what),
            Error::BadChannel(id) => write!(f, "Invalid channel id: {}", id),
            Error::NoReadAccess => write!(f, "Read access denied"),
            Error::NoWriteAccess => write!(f, "Write access denied"),
            // Limits
            Error::OutOfBounds { requested, limit } => write!(
                f,
                "Element count {} exceeds channel maximum {}",
                requested, limit
            ),
            Error::TooLarge { bytes, limit } => {
                write!(f, "Transfer of {} bytes exceeds maximum {}", bytes, limit)
            }
            Error::PoolExhausted(pool) => write!(f, "Pool exhausted: {}", pool),
            // Runtime
            Error::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::ShutDown => write!(f, "Client context shut down"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for results using the crate [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;
