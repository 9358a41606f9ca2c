// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel providers.
//!
//! A provider turns a name into a channel handle. The network provider
//! serves every name through a [`ContextCore`]; in-process providers (a
//! local record database, a simulator) can be placed in front of it with
//! [`RoutedProvider`], which asks each local provider first and falls back
//! to the network.

use std::fmt;
use std::sync::Arc;

use crate::channel::{ChannelId, ChannelNotify, ChannelState};
use crate::context::ContextCore;
use crate::error::{Error, Result};
use crate::io::{EventMask, IoId, ReadNotify, StateNotify, WriteNotify};
use crate::protocol::DbrType;

/// Source of channels.
pub trait ChannelProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Create a channel for `name`, or `Ok(None)` if this provider does
    /// not serve it.
    fn create_channel(
        &self,
        name: &str,
        notify: Arc<dyn ChannelNotify>,
        priority: u32,
    ) -> Result<Option<Box<dyn ProvidedChannel>>>;
}

/// Channel handle returned by a provider.
pub trait ProvidedChannel: Send + Sync {
    fn name(&self) -> String;

    fn state(&self) -> ChannelState;

    fn read_notify(&self, dbr: DbrType, count: u32, notify: Arc<dyn ReadNotify>) -> Result<IoId>;

    fn write(&self, dbr: DbrType, count: u32, value: &[u8]) -> Result<()>;

    fn write_notify(&self, dbr: DbrType, count: u32, value: &[u8], notify: Arc<dyn WriteNotify>) -> Result<IoId>;

    fn subscribe(&self, dbr: DbrType, count: u32, mask: EventMask, notify: Arc<dyn StateNotify>) -> Result<IoId>;

    /// Cancel an outstanding request. False when it already completed.
    fn cancel(&self, io: IoId) -> bool;

    fn destroy(&self) -> Result<()>;
}

// ============================================================================
// Network provider
// ============================================================================

/// Serves every name over Channel Access.
#[derive(Clone)]
pub struct NetworkProvider {
    core: Arc<ContextCore>,
}

impl NetworkProvider {
    pub fn new(core: Arc<ContextCore>) -> Self {
        Self { core }
    }
}

impl fmt::Debug for NetworkProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkProvider").finish_non_exhaustive()
    }
}

impl ChannelProvider for NetworkProvider {
    fn name(&self) -> &str {
        "network"
    }

    fn create_channel(
        &self,
        name: &str,
        notify: Arc<dyn ChannelNotify>,
        priority: u32,
    ) -> Result<Option<Box<dyn ProvidedChannel>>> {
        let id = self.core.create_channel(name, Some(notify), priority)?;
        Ok(Some(Box::new(NetworkChannel {
            core: Arc::clone(&self.core),
            id,
        })))
    }
}

/// Network channel: a [`ChannelId`] plus the context that owns it.
pub struct NetworkChannel {
    core: Arc<ContextCore>,
    id: ChannelId,
}

impl NetworkChannel {
    pub fn id(&self) -> ChannelId {
        self.id
    }
}

impl ProvidedChannel for NetworkChannel {
    fn name(&self) -> String {
        self.core.channel_name(self.id).unwrap_or_default()
    }

    fn state(&self) -> ChannelState {
        self.core.channel_state(self.id)
    }

    fn read_notify(&self, dbr: DbrType, count: u32, notify: Arc<dyn ReadNotify>) -> Result<IoId> {
        self.core.read_notify_request(self.id, dbr, count, Some(notify))
    }

    fn write(&self, dbr: DbrType, count: u32, value: &[u8]) -> Result<()> {
        self.core.write_request(self.id, dbr, count, value)
    }

    fn write_notify(&self, dbr: DbrType, count: u32, value: &[u8], notify: Arc<dyn WriteNotify>) -> Result<IoId> {
        self.core.write_notify_request(self.id, dbr, count, value, Some(notify))
    }

    fn subscribe(&self, dbr: DbrType, count: u32, mask: EventMask, notify: Arc<dyn StateNotify>) -> Result<IoId> {
        self.core.subscription_request(self.id, dbr, count, mask, Some(notify))
    }

    fn cancel(&self, io: IoId) -> bool {
        self.core.cancel_io(self.id, io)
    }

    fn destroy(&self) -> Result<()> {
        self.core.destroy_channel(self.id)
    }
}

// ============================================================================
// Routed provider
// ============================================================================

/// Local providers first, then the network.
pub struct RoutedProvider {
    local: Vec<Arc<dyn ChannelProvider>>,
    network: NetworkProvider,
}

impl RoutedProvider {
    /// Local channels call back on whatever thread serves them, so they
    /// need a context configured for preemptive callbacks.
    pub fn new(core: Arc<ContextCore>, local: Vec<Arc<dyn ChannelProvider>>) -> Result<Self> {
        if !local.is_empty() && !core.config().preemptive_callbacks {
            return Err(Error::Unsupported("local channels without preemptive callbacks"));
        }
        Ok(Self {
            local,
            network: NetworkProvider::new(core),
        })
    }
}

impl ChannelProvider for RoutedProvider {
    fn name(&self) -> &str {
        "routed"
    }

    fn create_channel(
        &self,
        name: &str,
        notify: Arc<dyn ChannelNotify>,
        priority: u32,
    ) -> Result<Option<Box<dyn ProvidedChannel>>> {
        for provider in &self.local {
            if let Some(channel) = provider.create_channel(name, Arc::clone(&notify), priority)? {
                log::debug!("[provider] '{}' served by {}", name, provider.name());
                return Ok(Some(channel));
            }
        }
        self.network.create_channel(name, notify, priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::context::state::tests::Quiet;
    use crate::ClientContext;

    /// Serves names starting with "LOCAL:" and nothing else.
    struct Local;

    struct LocalChannel(String);

    impl ProvidedChannel for LocalChannel {
        fn name(&self) -> String {
            self.0.clone()
        }
        fn state(&self) -> ChannelState {
            ChannelState::Connected
        }
        fn read_notify(&self, dbr: DbrType, count: u32, notify: Arc<dyn ReadNotify>) -> Result<IoId> {
            notify.completion(dbr, count, &[0; 8]);
            Ok(IoId(0))
        }
        fn write(&self, _: DbrType, _: u32, _: &[u8]) -> Result<()> {
            Ok(())
        }
        fn write_notify(&self, _: DbrType, _: u32, _: &[u8], notify: Arc<dyn WriteNotify>) -> Result<IoId> {
            notify.completion();
            Ok(IoId(1))
        }
        fn subscribe(&self, _: DbrType, _: u32, _: EventMask, _: Arc<dyn StateNotify>) -> Result<IoId> {
            Ok(IoId(2))
        }
        fn cancel(&self, _: IoId) -> bool {
            false
        }
        fn destroy(&self) -> Result<()> {
            Ok(())
        }
    }

    impl ChannelProvider for Local {
        fn name(&self) -> &str {
            "local"
        }
        fn create_channel(
            &self,
            name: &str,
            _notify: Arc<dyn ChannelNotify>,
            _priority: u32,
        ) -> Result<Option<Box<dyn ProvidedChannel>>> {
            Ok(name
                .starts_with("LOCAL:")
                .then(|| Box::new(LocalChannel(name.to_string())) as Box<dyn ProvidedChannel>))
        }
    }

    #[test]
    fn test_local_first_then_network() {
        let ctx = ClientContext::new(ClientConfig::default()).unwrap();
        let routed = RoutedProvider::new(ctx.core(), vec![Arc::new(Local)]).unwrap();

        let local = routed.create_channel("LOCAL:x", Arc::new(Quiet), 0).unwrap().unwrap();
        assert_eq!(local.state(), ChannelState::Connected);
        assert_eq!(ctx.pool_stats().channels.in_use, 0);

        let remote = routed.create_channel("REMOTE:x", Arc::new(Quiet), 0).unwrap().unwrap();
        assert_eq!(remote.state(), ChannelState::Searching);
        assert_eq!(remote.name(), "REMOTE:x");
        assert_eq!(ctx.pool_stats().channels.in_use, 1);
        remote.destroy().unwrap();
        assert_eq!(remote.state(), ChannelState::Destroyed);
    }

    #[test]
    fn test_local_requires_preemptive_callbacks() {
        let ctx = ClientContext::new(ClientConfig::default().with_preemptive_callbacks(false)).unwrap();
        let err = RoutedProvider::new(ctx.core(), vec![Arc::new(Local)]).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::UnsupportedByService);
        assert!(RoutedProvider::new(ctx.core(), Vec::new()).is_ok());
    }
}
