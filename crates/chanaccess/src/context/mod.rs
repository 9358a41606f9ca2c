// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client context: the engine behind every channel.
//!
//! The context multiplexes channels and their I/O over a small number of
//! virtual circuits, one per (server, priority). Threads:
//!
//! ```text
//! application threads --+
//!                       |    callback lock (reentrant)
//! circuit receivers ----+--> primary lock --> tables
//!                       |
//! timer thread ---------+
//! ```
//!
//! Every mutation happens under the primary lock. User callbacks run with
//! the callback lock held and the primary lock released, so a callback may
//! call back into the context. Operations that can produce callbacks take
//! the callback lock first; this also makes cancellation atomic with
//! respect to delivery: once `cancel_io` returns, no callback for that
//! request runs.
//!
//! # Example
//!
//! ```no_run
//! use chanaccess::{ChannelNotify, ChannelId, ClientConfig, ClientContext};
//! use std::sync::Arc;
//!
//! struct Print;
//! impl ChannelNotify for Print {
//!     fn connect_notify(&self, channel: ChannelId) {
//!         println!("{} connected", channel);
//!     }
//! }
//!
//! let ctx = ClientContext::new(ClientConfig::default())?;
//! let ch = ctx.create_channel("TEMP:1", Some(Arc::new(Print)), 0)?;
//! ctx.flush();
//! # Ok::<(), chanaccess::Error>(())
//! ```

mod beacons;
mod channels;
mod circuits;
pub(crate) mod delivery;
mod diagnostics;
mod dispatch;
pub(crate) mod locks;
mod requests;
pub(crate) mod state;
mod timer;

pub use diagnostics::ContextStats;

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::channel::ChannelId;
use crate::circuit::{CircuitConnector, TcpConnector};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::pool::ReceiveBuffers;
use crate::protocol::{MinorVersion, Status};

use delivery::{Effects, Guard};
use locks::{Locks, PrimaryGuard};
use state::ContextState;
use timer::TimerHandle;

// ============================================================================
// Collaborator boundaries
// ============================================================================

/// A pending name lookup handed to the resolver.
pub struct SearchRequest {
    pub channel: ChannelId,
    pub name: String,
    pub replier: SearchReplier,
}

/// Reports a successful lookup back to the context.
#[derive(Clone)]
pub struct SearchReplier {
    core: Weak<ContextCore>,
    channel: ChannelId,
}

impl SearchReplier {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// The channel's name was found on `server`, which speaks `minor`.
    pub fn found(&self, server: SocketAddr, minor: MinorVersion) -> Result<()> {
        let core = self.core.upgrade().ok_or(Error::ShutDown)?;
        core.transfer_channel_to_circuit(self.channel, server, minor)
    }
}

impl fmt::Debug for SearchReplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchReplier")
            .field("channel", &self.channel)
            .finish()
    }
}

/// Name resolution transport (UDP search, a name server, a static table).
///
/// Called without any context lock held.
pub trait NameResolver: Send + Sync {
    fn search(&self, request: SearchRequest);

    /// Stop looking for `channel`.
    fn cancel(&self, channel: ChannelId);

    /// A server (re)appeared; retry outstanding searches soon.
    fn expedite(&self) {}
}

/// Resolver that never finds anything. Channels stay searching until
/// [`ContextCore::transfer_channel_to_circuit`] is called directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullResolver;

impl NameResolver for NullResolver {
    fn search(&self, request: SearchRequest) {
        log::trace!("[context] no resolver for '{}'", request.name);
    }

    fn cancel(&self, _channel: ChannelId) {}
}

/// Exceptions not attributable to one request.
pub trait ContextNotify: Send + Sync {
    fn exception(&self, status: Status, context: &str, server: Option<SocketAddr>);
}

/// Default [`ContextNotify`]: log and continue.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotify;

impl ContextNotify for LogNotify {
    fn exception(&self, status: Status, context: &str, server: Option<SocketAddr>) {
        match server {
            Some(addr) => log::warn!("[context] {} from {}: {}", status, addr, context),
            None => log::warn!("[context] {}: {}", status, context),
        }
    }
}

// ============================================================================
// ContextCore
// ============================================================================

/// Shared context state. Reached through [`ClientContext`] (by deref) or
/// [`ClientContext::core`] for components that need an owned handle.
pub struct ContextCore {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) locks: Locks<ContextState>,
    pub(crate) group_cv: Condvar,
    pub(crate) resolver: Arc<dyn NameResolver>,
    pub(crate) connector: Arc<dyn CircuitConnector>,
    pub(crate) notify: Arc<dyn ContextNotify>,
    pub(crate) buffers: ReceiveBuffers,
    pub(crate) start: Instant,
    pub(crate) me: Weak<ContextCore>,
}

impl ContextCore {
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Carry out deferred effects: flush circuits, release the primary
    /// lock, call the resolver, then deliver callbacks.
    pub(crate) fn finish(&self, mut st: PrimaryGuard<'_, ContextState>, fx: Effects) {
        if fx.is_empty() {
            return;
        }
        let Effects {
            deliveries,
            searches,
            cancels,
            expedite,
            flush,
        } = fx;

        for circuit in flush {
            self.flush_circuit(&mut st, circuit);
        }
        drop(st);

        for channel in cancels {
            self.resolver.cancel(channel);
        }
        for (channel, name) in searches {
            self.resolver.search(SearchRequest {
                channel,
                name,
                replier: SearchReplier {
                    core: self.me.clone(),
                    channel,
                },
            });
        }
        if expedite {
            self.resolver.expedite();
        }

        if deliveries.is_empty() {
            return;
        }
        let _cb = self.locks.callback();
        for delivery in deliveries {
            let live = match delivery.guard {
                Guard::None => true,
                Guard::Channel(id) => self.locks.primary().channels.contains(id.0),
                Guard::Io(id) => self.locks.primary().ios.kind(id).is_some(),
            };
            if live {
                delivery.event.dispatch(self.notify.as_ref());
            }
        }
    }

    /// Whether `shutdown` has run.
    pub fn is_shut_down(&self) -> bool {
        self.locks.primary().shutdown
    }

    /// Abort every circuit and wait for the receive threads.
    ///
    /// Idempotent. Called from inside a callback it does not wait.
    pub fn shutdown(&self) {
        let handles = {
            let mut st = self.locks.primary();
            if st.shutdown {
                return;
            }
            st.shutdown = true;
            st.begin_shutdown(Instant::now())
        };
        log::info!("[context] shutting down, {} receive thread(s)", handles.len());

        let cancels = {
            let st = self.locks.primary();
            st.searching_channels()
        };
        for channel in cancels {
            self.resolver.cancel(channel);
        }

        if self.locks.in_callback() {
            log::warn!("[context] shutdown from a callback; not joining receive threads");
            return;
        }
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("[context] receive thread panicked");
            }
        }

        // circuits whose receiver never reported back
        let _cb = self.locks.callback();
        let mut st = self.locks.primary();
        let mut fx = Effects::default();
        for id in st.circuit_ids() {
            st.destroy_circuit(id, &mut fx);
        }
        self.finish(st, fx);
    }
}

impl fmt::Debug for ContextCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCore")
            .field("uptime", &self.start.elapsed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder and owner handle
// ============================================================================

/// Builds a [`ClientContext`] with custom collaborators.
pub struct ContextBuilder {
    config: ClientConfig,
    resolver: Arc<dyn NameResolver>,
    connector: Option<Arc<dyn CircuitConnector>>,
    notify: Arc<dyn ContextNotify>,
}

impl ContextBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            resolver: Arc::new(NullResolver),
            connector: None,
            notify: Arc::new(LogNotify),
        }
    }

    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn CircuitConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn notify(mut self, notify: Arc<dyn ContextNotify>) -> Self {
        self.notify = notify;
        self
    }

    pub fn build(self) -> Result<ClientContext> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(TcpConnector::new(config.nodelay, config.keepalive)) as Arc<dyn CircuitConnector>
        });
        let buffers = ReceiveBuffers::new(&config);
        let resolver = self.resolver;
        let notify = self.notify;

        let core = Arc::new_cyclic(|me| ContextCore {
            locks: Locks::new(ContextState::new(Arc::clone(&config))),
            config: Arc::clone(&config),
            group_cv: Condvar::new(),
            resolver,
            connector,
            notify,
            buffers,
            start: Instant::now(),
            me: me.clone(),
        });

        let timer = timer::spawn(Arc::downgrade(&core), config.timer_tick)?;
        log::info!(
            "[context] started (max_array_bytes={}, conn_tmo={:?})",
            config.max_array_bytes,
            config.connection_timeout
        );
        Ok(ClientContext {
            core,
            timer: Mutex::new(Some(timer)),
        })
    }
}

/// Owner of a client context. Dropping it shuts the context down.
pub struct ClientContext {
    core: Arc<ContextCore>,
    timer: Mutex<Option<TimerHandle>>,
}

impl ClientContext {
    /// Context with the default TCP connector and no name resolver.
    pub fn new(config: ClientConfig) -> Result<Self> {
        ContextBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ContextBuilder {
        ContextBuilder::new(config)
    }

    /// Owned handle on the shared core.
    pub fn core(&self) -> Arc<ContextCore> {
        Arc::clone(&self.core)
    }

    /// Stop the timer thread, then shut the core down.
    pub fn shutdown(&self) {
        if let Some(mut timer) = self.timer.lock().take() {
            timer.stop();
        }
        self.core.shutdown();
    }
}

impl Deref for ClientContext {
    type Target = ContextCore;

    fn deref(&self) -> &ContextCore {
        &self.core
    }
}

impl Drop for ClientContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClientContext").field(&self.core).finish()
    }
}
