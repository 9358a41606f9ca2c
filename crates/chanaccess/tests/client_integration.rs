// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test readability over pedantic
#![allow(clippy::float_cmp)] // Exact values round-trip through the server
#![allow(clippy::cast_possible_truncation)] // Test parameters

//! End-to-end client tests against a loopback server.
//!
//! Each test starts its own server and context, connects over real TCP and
//! drives the public API.

mod common;

use chanaccess::protocol::command;
use chanaccess::protocol::header::encode_message;
use chanaccess::circuit::BoxedByteStream;
use chanaccess::{
    ByteStream, ChannelId, ChannelState, CircuitConnector, ClientConfig, ClientContext, DbrType, ErrorKind,
    EventMask, GroupStatus, Status,
};
use common::*;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn server_with_temp() -> FakeServer {
    let server = FakeServer::start();
    server.add_pv("TEMP:1", DbrType::DOUBLE, 5, doubles(&[1.0, 2.0, 3.0, 4.0, 5.0]), true);
    server
}

fn context(server: &FakeServer) -> ClientContext {
    ClientContext::builder(ClientConfig::default())
        .resolver(server.resolver())
        .build()
        .unwrap()
}

fn connect(ctx: &ClientContext, name: &str) -> (ChannelId, Arc<ChannelEvents>) {
    let events = Arc::new(ChannelEvents::default());
    let ch = ctx.create_channel(name, Some(events.clone()), 0).unwrap();
    assert!(
        wait_for(WAIT, || ctx.channel_state(ch) == ChannelState::Connected),
        "{} did not connect",
        name
    );
    (ch, events)
}

#[test]
fn test_connect_read_write() {
    let server = server_with_temp();
    let ctx = context(&server);
    let (ch, events) = connect(&ctx, "TEMP:1");

    assert_eq!(ctx.native_type(ch).unwrap(), Some(DbrType::DOUBLE));
    assert_eq!(ctx.native_count(ch).unwrap(), 5);
    assert_eq!(ctx.server_address(ch).unwrap(), Some(server.addr()));
    assert!(ctx.access_rights(ch).unwrap().write);
    assert!(wait_for(WAIT, || events.rights.load(Ordering::SeqCst) >= 1));
    assert_eq!(events.connects.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.circuit_count(), 1);

    let read = Arc::new(Completion::default());
    ctx.read_notify_request(ch, DbrType::DOUBLE, 5, Some(read.clone()))
        .unwrap();
    ctx.flush();
    let value = read.wait().unwrap().unwrap();
    assert_eq!(to_doubles(&value), vec![1.0, 2.0, 3.0, 4.0, 5.0]);

    let written = Arc::new(Completion::default());
    ctx.write_notify_request(ch, DbrType::DOUBLE, 2, &doubles(&[7.5, 8.5]), Some(written.clone()))
        .unwrap();
    ctx.flush();
    assert_eq!(written.wait(), Some(Ok(Vec::new())));
    assert_eq!(to_doubles(&server.value("TEMP:1").unwrap()), vec![7.5, 8.5]);

    ctx.write_request(ch, DbrType::DOUBLE, 1, &doubles(&[9.0])).unwrap();
    ctx.flush();
    assert!(wait_for(WAIT, || server
        .value("TEMP:1")
        .is_some_and(|v| to_doubles(&v) == vec![9.0])));

    assert_eq!(ctx.pool_stats().reads.in_use, 0);
    assert_eq!(ctx.pool_stats().writes.in_use, 0);
    assert!(ctx.self_test().is_empty());
}

#[test]
fn test_count_above_native_is_out_of_bounds() {
    let server = server_with_temp();
    let ctx = context(&server);
    let (ch, _) = connect(&ctx, "TEMP:1");
    let before = ctx.pool_stats();

    let read = Arc::new(Completion::default());
    let err = ctx
        .read_notify_request(ch, DbrType::DOUBLE, 10, Some(read.clone()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfBounds);

    let after = ctx.pool_stats();
    assert_eq!(after.reads.in_use, before.reads.in_use);
    assert_eq!(after.reads.allocations, before.reads.allocations);
    assert_eq!(read.calls.load(Ordering::SeqCst), 0);
    assert!(ctx.self_test().is_empty());
}

#[test]
fn test_missing_notify_target_rejected() {
    let server = server_with_temp();
    let ctx = context(&server);
    let err = ctx.create_channel("TEMP:1", None, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    assert_eq!(ctx.pool_stats().channels.in_use, 0);

    let (ch, _) = connect(&ctx, "TEMP:1");
    let err = ctx.read_notify_request(ch, DbrType::DOUBLE, 1, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    let err = ctx
        .subscription_request(ch, DbrType::DOUBLE, 1, EventMask::VALUE, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
}

#[test]
fn test_read_only_channel_refuses_writes() {
    let server = FakeServer::start();
    server.add_pv("RO:1", DbrType::DOUBLE, 1, doubles(&[3.0]), false);
    let ctx = context(&server);
    let (ch, _) = connect(&ctx, "RO:1");

    let err = ctx.write_request(ch, DbrType::DOUBLE, 1, &doubles(&[1.0])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoWriteAccess);
    assert_eq!(ctx.pool_stats().writes.in_use, 0);
}

#[test]
fn test_double_destroy_io_returns_one_record() {
    let server = server_with_temp();
    let ctx = context(&server);
    let (ch, _) = connect(&ctx, "TEMP:1");

    // not flushed: the request cannot complete before it is destroyed
    let read = Arc::new(Completion::default());
    let id = ctx
        .read_notify_request(ch, DbrType::DOUBLE, 1, Some(read.clone()))
        .unwrap();
    let first = ctx.destroy_io(id, ch);
    let second = ctx.destroy_io(id, ch);
    assert_eq!(first.map(|io| io.id), Some(id));
    assert!(second.is_none());

    ctx.flush();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(read.calls.load(Ordering::SeqCst), 0);
    let stats = ctx.pool_stats();
    assert_eq!(stats.reads.allocations, stats.reads.releases);
}

#[test]
fn test_subscription_survives_reconnect() {
    let server = server_with_temp();
    let ctx = context(&server);
    let (ch, events) = connect(&ctx, "TEMP:1");

    let updates = Arc::new(Updates::default());
    let id = ctx
        .subscription_request(ch, DbrType::DOUBLE, 0, EventMask::default(), Some(updates.clone()))
        .unwrap();
    ctx.flush();
    assert!(wait_for(WAIT, || updates.count() >= 1));

    server.drop_connections();
    assert!(wait_for(WAIT, || events.disconnects.load(Ordering::SeqCst) == 1));
    assert!(wait_for(WAIT, || events.connects.load(Ordering::SeqCst) == 2));
    assert!(wait_for(WAIT, || updates.count() >= 2));
    assert_eq!(server.connections_accepted(), 2);
    assert_eq!(ctx.io_request(id).map(|io| io.id), Some(id));

    server.post("TEMP:1", doubles(&[42.0; 5]));
    assert!(wait_for(WAIT, || updates
        .values
        .lock()
        .last()
        .is_some_and(|v| to_doubles(v)[0] == 42.0)));

    let log = events.log.lock().clone();
    assert_eq!(log, vec!["connect", "disconnect", "connect"]);
    assert!(updates.errors.lock().is_empty());
}

#[test]
fn test_disconnect_fails_pending_reads_after_notification() {
    let server = server_with_temp();
    let ctx = ClientContext::builder(ClientConfig::default().with_auto_reconnect(false))
        .resolver(server.resolver())
        .build()
        .unwrap();
    let (ch, events) = connect(&ctx, "TEMP:1");

    let read = Arc::new(Completion::default());
    ctx.read_notify_request(ch, DbrType::DOUBLE, 1, Some(read.clone()))
        .unwrap();
    server.drop_connections();

    assert_eq!(read.wait(), Some(Err(Status::DISCONN)));
    assert_eq!(events.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.channel_state(ch), ChannelState::Disconnected);
    assert_eq!(ctx.pool_stats().reads.in_use, 0);
}

#[test]
fn test_unknown_command_is_isolated() {
    let server = server_with_temp();
    let exceptions = Arc::new(Exceptions::default());
    let ctx = ClientContext::builder(ClientConfig::default())
        .resolver(server.resolver())
        .notify(exceptions.clone())
        .build()
        .unwrap();
    let (ch, events) = connect(&ctx, "TEMP:1");

    let mut raw = Vec::new();
    encode_message(&mut raw, chanaccess::protocol::MessageHeader::new(200), &[1, 2, 3]);
    encode_message(&mut raw, chanaccess::protocol::MessageHeader::new(command::SEARCH), &[]);
    server.send_raw(&raw);
    assert!(wait_for(WAIT, || exceptions.seen.lock().len() == 2));
    assert!(exceptions.seen.lock().iter().all(|s| *s == Status::INTERNAL));

    let read = Arc::new(Completion::default());
    ctx.read_notify_request(ch, DbrType::DOUBLE, 1, Some(read.clone()))
        .unwrap();
    ctx.flush();
    assert_eq!(read.wait().map(|r| r.map(|v| to_doubles(&v))), Some(Ok(vec![1.0])));
    assert_eq!(ctx.circuit_count(), 1);
    assert_eq!(events.disconnects.load(Ordering::SeqCst), 0);
}

/// Fails if an update arrives after `cancel_io` returned.
#[derive(Default)]
struct CancelAware {
    canceled: AtomicBool,
    late: AtomicU32,
    seen: AtomicU32,
}

impl chanaccess::StateNotify for CancelAware {
    fn current(&self, _dbr: DbrType, _count: u32, _data: &[u8]) {
        self.seen.fetch_add(1, Ordering::SeqCst);
        if self.canceled.load(Ordering::SeqCst) {
            self.late.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn exception(&self, _status: Status, _context: &str, _dbr: DbrType, _count: u32) {}
}

#[test]
fn test_cancel_races_with_updates() {
    let server = Arc::new(server_with_temp());
    let ctx = context(&server);
    let (ch, _) = connect(&ctx, "TEMP:1");

    let stop = Arc::new(AtomicBool::new(false));
    let poster = {
        let server = Arc::clone(&server);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut n = 0.0;
            while !stop.load(Ordering::SeqCst) {
                n += 1.0;
                server.post("TEMP:1", doubles(&[n; 5]));
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    let mut sinks = Vec::new();
    for _ in 0..40 {
        let sink = Arc::new(CancelAware::default());
        let id = ctx
            .subscription_request(ch, DbrType::DOUBLE, 5, EventMask::VALUE, Some(sink.clone()))
            .unwrap();
        ctx.flush();
        thread::sleep(Duration::from_millis(fastrand::u64(0..4)));
        assert!(ctx.cancel_io(ch, id));
        sink.canceled.store(true, Ordering::SeqCst);
        assert!(!ctx.cancel_io(ch, id));
        sinks.push(sink);
    }

    for _ in 0..40 {
        let read = Arc::new(Completion::default());
        let id = ctx
            .read_notify_request(ch, DbrType::DOUBLE, 5, Some(read.clone()))
            .unwrap();
        ctx.flush();
        thread::sleep(Duration::from_micros(fastrand::u64(0..800)));
        let destroyed = ctx.destroy_io(id, ch).is_some();
        let expected = u32::from(!destroyed);
        assert!(wait_for(Duration::from_millis(200), || read.calls.load(Ordering::SeqCst) == expected));
        assert_eq!(read.calls.load(Ordering::SeqCst), expected);
    }

    stop.store(true, Ordering::SeqCst);
    poster.join().unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(sinks.iter().all(|s| s.late.load(Ordering::SeqCst) == 0));
    let stats = ctx.pool_stats();
    assert_eq!(stats.subscriptions.in_use, 0);
    assert_eq!(stats.subscriptions.allocations, stats.subscriptions.releases);
    assert_eq!(stats.reads.allocations, stats.reads.releases);
    assert_eq!(stats.lock_violations, 0);
    assert!(ctx.self_test().is_empty());
}

/// TCP stream whose writes stall while `slow` is set.
struct SlowStream {
    inner: TcpStream,
    slow: Arc<AtomicBool>,
}

impl Read for SlowStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for SlowStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.slow.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1500));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl ByteStream for SlowStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.inner.shutdown(how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.inner.set_write_timeout(dur)
    }

    fn try_clone_stream(&self) -> io::Result<BoxedByteStream> {
        Ok(Box::new(SlowStream {
            inner: self.inner.try_clone()?,
            slow: Arc::clone(&self.slow),
        }))
    }
}

struct SlowConnector {
    slow: Arc<AtomicBool>,
}

impl CircuitConnector for SlowConnector {
    fn connect(&self, server: SocketAddr, timeout: Duration) -> io::Result<BoxedByteStream> {
        Ok(Box::new(SlowStream {
            inner: TcpStream::connect_timeout(&server, timeout)?,
            slow: Arc::clone(&self.slow),
        }))
    }
}

#[test]
fn test_slow_socket_write_does_not_block_context() {
    let server = server_with_temp();
    let slow = Arc::new(AtomicBool::new(false));
    let ctx = ClientContext::builder(ClientConfig::default())
        .resolver(server.resolver())
        .connector(Arc::new(SlowConnector { slow: Arc::clone(&slow) }))
        .build()
        .unwrap();
    let (ch, _events) = connect(&ctx, "TEMP:1");
    slow.store(true, Ordering::SeqCst);

    let first = {
        let core = ctx.core();
        thread::spawn(move || {
            core.write_request(ch, DbrType::DOUBLE, 1, &doubles(&[7.0])).unwrap();
            core.flush();
        })
    };
    thread::sleep(Duration::from_millis(100));

    // A second flush while the first write is stalled leaves its bytes
    // queued behind it instead of waiting.
    let second = {
        let core = ctx.core();
        thread::spawn(move || {
            let begin = Instant::now();
            core.write_request(ch, DbrType::DOUBLE, 1, &doubles(&[8.0])).unwrap();
            core.flush();
            begin.elapsed()
        })
    };
    thread::sleep(Duration::from_millis(100));

    let begin = Instant::now();
    assert_eq!(ctx.channel_state(ch), ChannelState::Connected);
    assert!(ctx.self_test().is_empty());
    let elapsed = begin.elapsed();
    assert!(elapsed < Duration::from_millis(300), "context blocked for {:?}", elapsed);

    let second_elapsed = second.join().unwrap();
    assert!(second_elapsed < Duration::from_millis(300), "second flush blocked for {:?}", second_elapsed);

    slow.store(false, Ordering::SeqCst);
    first.join().unwrap();

    // Queue order survives: the later write lands last.
    assert!(wait_for(WAIT, || server
        .value("TEMP:1")
        .is_some_and(|v| to_doubles(&v)[0] == 8.0)));
    assert_eq!(ctx.channel_state(ch), ChannelState::Connected);
}

#[test]
fn test_sync_group_partial_failure() {
    let server = server_with_temp();
    server.add_pv("REJECT:1", DbrType::DOUBLE, 1, doubles(&[0.0]), true);
    server.reject_writes("REJECT:1");
    let ctx = context(&server);
    let (good, _) = connect(&ctx, "TEMP:1");
    let (bad, _) = connect(&ctx, "REJECT:1");

    let group = ctx.sync_group_create().unwrap();
    ctx.sync_group_put(group, good, DbrType::DOUBLE, 1, &doubles(&[11.0]))
        .unwrap();
    ctx.sync_group_put(group, bad, DbrType::DOUBLE, 1, &doubles(&[12.0]))
        .unwrap();
    let status = ctx.sync_group_block(group, WAIT).unwrap();
    assert_eq!(
        status,
        GroupStatus::PartialFailure {
            failed: 1,
            succeeded: 1
        }
    );

    ctx.sync_group_reset(group).unwrap();
    ctx.sync_group_get(group, good, DbrType::DOUBLE, 1).unwrap();
    assert_eq!(ctx.sync_group_block(group, WAIT).unwrap(), GroupStatus::Complete);
    let members = ctx.sync_group_members(group).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].value.as_deref().map(to_doubles), Some(vec![11.0]));
    assert!(ctx.sync_group_test(group).unwrap());
    ctx.sync_group_delete(group).unwrap();
}

#[test]
fn test_sync_group_block_times_out() {
    let server = server_with_temp();
    let ctx = context(&server);
    let (ch, _) = connect(&ctx, "TEMP:1");

    let group = ctx.sync_group_create().unwrap();
    server.mute_reads(true);
    ctx.sync_group_get(group, ch, DbrType::DOUBLE, 1).unwrap();
    let err = ctx
        .sync_group_block(group, Duration::from_millis(200))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!ctx.sync_group_test(group).unwrap());

    // detached member completes unobserved
    ctx.sync_group_reset(group).unwrap();
    assert!(ctx.sync_group_test(group).unwrap());

    let err = ctx
        .sync_group_block(chanaccess::GroupId(9999), Duration::from_millis(1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
}

/// Reads the channel from inside its own connect callback.
struct Reentrant {
    ctx: parking_lot::Mutex<Option<std::sync::Weak<chanaccess::ContextCore>>>,
    read: Arc<Completion>,
}

impl chanaccess::ChannelNotify for Reentrant {
    fn connect_notify(&self, channel: ChannelId) {
        let Some(core) = self.ctx.lock().as_ref().and_then(|w| w.upgrade()) else {
            return;
        };
        assert_eq!(core.native_count(channel).unwrap(), 5);
        core.read_notify_request(channel, DbrType::DOUBLE, 2, Some(self.read.clone()))
            .unwrap();
        core.flush();
    }
}

#[test]
fn test_callback_may_call_back_into_context() {
    let server = server_with_temp();
    let ctx = context(&server);
    let notify = Arc::new(Reentrant {
        ctx: parking_lot::Mutex::new(Some(Arc::downgrade(&ctx.core()))),
        read: Arc::new(Completion::default()),
    });
    let ch = ctx.create_channel("TEMP:1", Some(notify.clone()), 10).unwrap();
    let value = notify.read.wait().unwrap().unwrap();
    assert_eq!(to_doubles(&value), vec![1.0, 2.0]);
    assert_eq!(ctx.channel_state(ch), ChannelState::Connected);
    assert_eq!(ctx.pool_stats().lock_violations, 0);
}

#[test]
fn test_unknown_name_keeps_searching() {
    let server = server_with_temp();
    let ctx = context(&server);
    let events = Arc::new(ChannelEvents::default());
    let ch = ctx.create_channel("NOPE:1", Some(events.clone()), 0).unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_ne!(ctx.channel_state(ch), ChannelState::Connected);
    assert_eq!(events.connects.load(Ordering::SeqCst), 0);

    ctx.destroy_channel(ch).unwrap();
    assert_eq!(ctx.channel_state(ch), ChannelState::Destroyed);
    assert_eq!(ctx.destroy_channel(ch).unwrap_err().kind(), ErrorKind::BadChannel);
}

#[test]
fn test_shutdown_is_idempotent() {
    let server = server_with_temp();
    let ctx = context(&server);
    let (ch, _) = connect(&ctx, "TEMP:1");
    ctx.shutdown();
    ctx.shutdown();
    assert!(ctx.is_shut_down());
    assert_eq!(ctx.circuit_count(), 0);
    let err = ctx.create_channel("TEMP:2", Some(Arc::new(ChannelEvents::default())), 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShutDown);
    assert_ne!(ctx.channel_state(ch), ChannelState::Connected);
}
