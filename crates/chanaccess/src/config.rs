// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client context configuration.
//!
//! `ClientConfig::default()` honours the usual environment overrides:
//!
//! | Variable | Field | Unit |
//! |---|---|---|
//! | `EPICS_CA_CONN_TMO` | `connection_timeout` | seconds (float) |
//! | `EPICS_CA_BEACON_PERIOD` | `beacon_period` | seconds (float) |
//! | `EPICS_CA_MAX_ARRAY_BYTES` | `max_array_bytes` | bytes |
//!
//! # Example
//!
//! ```
//! use chanaccess::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::default()
//!     .with_connection_timeout(Duration::from_secs(10))
//!     .with_max_channels(256);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::circuit::FlushPolicy;
use crate::error::{Error, Result};

/// Size of a small receive buffer; bodies up to this size never touch the
/// large pool.
pub const SMALL_BUFFER_SIZE: usize = 16 * 1024;

/// Smallest accepted `max_array_bytes`.
pub const MIN_ARRAY_BYTES: usize = SMALL_BUFFER_SIZE;

/// Longest accepted channel name.
pub const MAX_CHANNEL_NAME_LEN: usize = 512;

/// Client context configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    // === Connection ===
    /// Timeout for dialing a server
    pub connect_timeout: Duration,

    /// Silence on a circuit before an echo probe is sent
    pub connection_timeout: Duration,

    /// Time allowed for an echo reply before the circuit is declared unresponsive
    pub echo_timeout: Duration,

    /// Time allowed for graceful circuit teardown before forced destruction
    pub abort_timeout: Duration,

    /// Expected server beacon period
    pub beacon_period: Duration,

    /// Re-search channels after their circuit is lost
    pub auto_reconnect: bool,

    /// Enable TCP_NODELAY on circuits
    pub nodelay: bool,

    /// Enable TCP keep-alive on circuits
    pub keepalive: bool,

    // === Buffers ===
    /// Largest array transfer accepted or sent, in bytes
    pub max_array_bytes: usize,

    /// Number of small receive buffers
    pub small_buffer_count: usize,

    /// Number of large receive buffers
    pub large_buffer_count: usize,

    /// Send buffer size that triggers an implicit flush
    pub flush_threshold: usize,

    /// Whether each request is flushed as it is queued
    pub flush_policy: FlushPolicy,

    // === Capacities ===
    pub max_channels: usize,
    pub max_read_requests: usize,
    pub max_write_requests: usize,
    pub max_subscriptions: usize,
    pub max_circuits: usize,
    pub max_sync_groups: usize,

    // === Fault handling ===
    /// Protocol violations tolerated on one circuit before it is aborted
    pub protocol_violation_limit: u32,

    // === Threads ===
    /// Period of the shared timer thread
    pub timer_tick: Duration,

    /// Receive socket timeout; bounds how long a receive thread takes to
    /// notice shutdown
    pub receive_poll: Duration,

    /// Service level of the lowest-priority circuit thread
    pub base_thread_priority: u8,

    /// Whether callbacks may run on threads other than the caller's
    pub preemptive_callbacks: bool,

    // === Identity ===
    /// Sent in CLIENT_NAME
    pub user_name: String,

    /// Sent in HOST_NAME
    pub host_name: String,
}

fn env_seconds(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            connection_timeout: env_seconds("EPICS_CA_CONN_TMO")
                .unwrap_or(Duration::from_secs(30)),
            echo_timeout: Duration::from_secs(5),
            abort_timeout: Duration::from_secs(5),
            beacon_period: env_seconds("EPICS_CA_BEACON_PERIOD")
                .unwrap_or(Duration::from_secs(15)),
            auto_reconnect: true,
            nodelay: true,
            keepalive: true,

            max_array_bytes: std::env::var("EPICS_CA_MAX_ARRAY_BYTES")
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .map_or(MIN_ARRAY_BYTES, |v| v.max(MIN_ARRAY_BYTES)),
            small_buffer_count: 64,
            large_buffer_count: 8,
            flush_threshold: 16 * 1024,
            flush_policy: FlushPolicy::Deferred,

            max_channels: 4096,
            max_read_requests: 4096,
            max_write_requests: 4096,
            max_subscriptions: 4096,
            max_circuits: 64,
            max_sync_groups: 64,

            protocol_violation_limit: 8,

            timer_tick: Duration::from_millis(100),
            receive_poll: Duration::from_millis(250),
            base_thread_priority: 50,
            preemptive_callbacks: true,

            user_name: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            host_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
        }
    }
}

impl ClientConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_echo_timeout(mut self, timeout: Duration) -> Self {
        self.echo_timeout = timeout;
        self
    }

    pub fn with_abort_timeout(mut self, timeout: Duration) -> Self {
        self.abort_timeout = timeout;
        self
    }

    pub fn with_beacon_period(mut self, period: Duration) -> Self {
        self.beacon_period = period;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_max_array_bytes(mut self, bytes: usize) -> Self {
        self.max_array_bytes = bytes;
        self
    }

    pub fn with_buffer_counts(mut self, small: usize, large: usize) -> Self {
        self.small_buffer_count = small;
        self.large_buffer_count = large;
        self
    }

    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes;
        self
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    pub fn with_max_channels(mut self, n: usize) -> Self {
        self.max_channels = n;
        self
    }

    /// Capacity of the read, write and subscription pools.
    pub fn with_io_capacity(mut self, reads: usize, writes: usize, subscriptions: usize) -> Self {
        self.max_read_requests = reads;
        self.max_write_requests = writes;
        self.max_subscriptions = subscriptions;
        self
    }

    pub fn with_max_circuits(mut self, n: usize) -> Self {
        self.max_circuits = n;
        self
    }

    pub fn with_max_sync_groups(mut self, n: usize) -> Self {
        self.max_sync_groups = n;
        self
    }

    pub fn with_protocol_violation_limit(mut self, limit: u32) -> Self {
        self.protocol_violation_limit = limit;
        self
    }

    pub fn with_timer_tick(mut self, tick: Duration) -> Self {
        self.timer_tick = tick;
        self
    }

    pub fn with_preemptive_callbacks(mut self, enabled: bool) -> Self {
        self.preemptive_callbacks = enabled;
        self
    }

    pub fn with_identity(mut self, user_name: impl Into<String>, host_name: impl Into<String>) -> Self {
        self.user_name = user_name.into();
        self.host_name = host_name.into();
        self
    }

    /// Size of a large receive buffer.
    pub fn large_buffer_size(&self) -> usize {
        self.max_array_bytes.max(SMALL_BUFFER_SIZE)
    }

    /// Largest message body a circuit accepts.
    pub fn max_receive_size(&self) -> usize {
        self.large_buffer_size()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_array_bytes < MIN_ARRAY_BYTES {
            return Err(Error::InvalidConfig(format!(
                "max_array_bytes {} below minimum {}",
                self.max_array_bytes, MIN_ARRAY_BYTES
            )));
        }
        if self.small_buffer_count == 0 {
            return Err(Error::InvalidConfig("small_buffer_count must be > 0".into()));
        }
        let capacities = [
            ("max_channels", self.max_channels),
            ("max_read_requests", self.max_read_requests),
            ("max_write_requests", self.max_write_requests),
            ("max_subscriptions", self.max_subscriptions),
            ("max_circuits", self.max_circuits),
            ("max_sync_groups", self.max_sync_groups),
        ];
        for (name, value) in capacities {
            if value == 0 || value > u32::MAX as usize {
                return Err(Error::InvalidConfig(format!("{} out of range: {}", name, value)));
            }
        }
        if self.timer_tick.is_zero() || self.receive_poll.is_zero() {
            return Err(Error::InvalidConfig("timer periods must be non-zero".into()));
        }
        if self.echo_timeout.is_zero() || self.connection_timeout.is_zero() {
            return Err(Error::InvalidConfig("echo timeouts must be non-zero".into()));
        }
        if self.base_thread_priority > crate::circuit::priority::MAX_PRIORITY_LEVEL {
            return Err(Error::InvalidConfig(format!(
                "base_thread_priority {} above {}",
                self.base_thread_priority,
                crate::circuit::priority::MAX_PRIORITY_LEVEL
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.max_array_bytes >= MIN_ARRAY_BYTES);
        assert_eq!(config.flush_threshold, 16 * 1024);
    }

    #[test]
    fn test_rejects_small_array_limit() {
        let config = ClientConfig::default().with_max_array_bytes(1024);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let config = ClientConfig::default().with_io_capacity(0, 1, 1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_read_requests"));
    }

    #[test]
    fn test_large_buffer_size_tracks_array_limit() {
        let config = ClientConfig::default().with_max_array_bytes(1 << 20);
        assert_eq!(config.large_buffer_size(), 1 << 20);
        assert_eq!(config.max_receive_size(), 1 << 20);
    }
}
