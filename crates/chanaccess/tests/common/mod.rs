// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: a loopback Channel Access server, a resolver that
//! points every name at it, and recording notify targets.

#![allow(dead_code)]

use chanaccess::protocol::command;
use chanaccess::protocol::header::encode_message;
use chanaccess::protocol::{MessageHeader, HEADER_SIZE};
use chanaccess::{
    ChannelId, ChannelNotify, ContextNotify, DbrType, MinorVersion, NameResolver, ReadNotify, SearchRequest,
    StateNotify, Status, WriteNotify,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `cond` until true or `timeout`.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn doubles(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

pub fn to_doubles(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| f64::from_be_bytes(c.try_into().unwrap()))
        .collect()
}

// ============================================================================
// Fake server
// ============================================================================

#[derive(Clone)]
struct Pv {
    dbr: DbrType,
    count: u32,
    value: Vec<u8>,
    writable: bool,
    /// Grant write access but reject every write
    rejects: bool,
}

struct Sub {
    conn: usize,
    name: String,
    subid: u32,
    dbr: DbrType,
    count: u32,
}

type Writer = Arc<Mutex<TcpStream>>;

#[derive(Default)]
struct Shared {
    pvs: Mutex<HashMap<String, Pv>>,
    conns: Mutex<Vec<Option<Writer>>>,
    subs: Mutex<Vec<Sub>>,
    next_sid: AtomicU32,
    stop: AtomicBool,
    accepted: AtomicU32,
    /// Ignore READ_NOTIFY requests
    muted: AtomicBool,
}

/// Minimal CA server on loopback serving a fixed set of PVs.
pub struct FakeServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        shared.next_sid.store(1000, Ordering::SeqCst);

        let accept_shared = Arc::clone(&shared);
        let accept = thread::spawn(move || {
            while !accept_shared.stop.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                        let conn_shared = Arc::clone(&accept_shared);
                        thread::spawn(move || serve(conn_shared, stream));
                    }
                    Err(_) => thread::sleep(Duration::from_millis(5)),
                }
            }
        });
        Self {
            addr,
            shared,
            accept: Some(accept),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn add_pv(&self, name: &str, dbr: DbrType, count: u32, value: Vec<u8>, writable: bool) {
        self.shared.pvs.lock().insert(
            name.to_string(),
            Pv {
                dbr,
                count,
                value,
                writable,
                rejects: false,
            },
        );
    }

    pub fn reject_writes(&self, name: &str) {
        if let Some(pv) = self.shared.pvs.lock().get_mut(name) {
            pv.rejects = true;
        }
    }

    pub fn value(&self, name: &str) -> Option<Vec<u8>> {
        self.shared.pvs.lock().get(name).map(|pv| pv.value.clone())
    }

    /// Stop answering reads.
    pub fn mute_reads(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::SeqCst);
    }

    /// Resolver answering exactly the names this server hosts.
    pub fn resolver(&self) -> Arc<StaticResolver> {
        Arc::new(StaticResolver {
            server: self.addr,
            shared: Arc::clone(&self.shared),
            searches: AtomicU32::new(0),
        })
    }

    pub fn connections_accepted(&self) -> u32 {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.shared.subs.lock().len()
    }

    /// Change a value and push it to subscribers.
    pub fn post(&self, name: &str, value: Vec<u8>) {
        if let Some(pv) = self.shared.pvs.lock().get_mut(name) {
            pv.value = value;
        }
        post_updates(&self.shared, name);
    }

    /// Send raw bytes on every open connection.
    pub fn send_raw(&self, bytes: &[u8]) {
        for writer in self.shared.conns.lock().iter().flatten() {
            let _ = writer.lock().write_all(bytes);
        }
    }

    /// Close every connection; the listener stays up.
    pub fn drop_connections(&self) {
        let mut conns = self.shared.conns.lock();
        for writer in conns.iter_mut().filter_map(Option::take) {
            let _ = writer.lock().shutdown(Shutdown::Both);
        }
        self.shared.subs.lock().clear();
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.drop_connections();
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }
    }
}

fn reply(writer: &Writer, header: MessageHeader, payload: &[u8]) {
    let mut buf = Vec::new();
    encode_message(&mut buf, header, payload);
    let _ = writer.lock().write_all(&buf);
}

fn sized(pv: &Pv, count: u32) -> (u32, Vec<u8>) {
    let count = if count == 0 { pv.count } else { count.min(pv.count) };
    let mut value = pv.value.clone();
    value.resize(pv.dbr.size_n(count), 0);
    (count, value)
}

fn post_updates(shared: &Shared, name: &str) {
    let Some(pv) = shared.pvs.lock().get(name).cloned() else {
        return;
    };
    let conns = shared.conns.lock();
    for sub in shared.subs.lock().iter().filter(|s| s.name == name) {
        let Some(Some(writer)) = conns.get(sub.conn) else {
            continue;
        };
        let (count, value) = sized(&pv, sub.count);
        let header = MessageHeader::new(command::EVENT_ADD)
            .with_type(sub.dbr.code(), count)
            .with_params(Status::NORMAL.raw(), sub.subid);
        reply(writer, header, &value);
    }
}

fn serve(shared: Arc<Shared>, stream: TcpStream) {
    stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    let writer: Writer = Arc::new(Mutex::new(stream.try_clone().unwrap()));
    let conn = {
        let mut conns = shared.conns.lock();
        conns.push(Some(Arc::clone(&writer)));
        conns.len() - 1
    };
    let mut reader = stream;
    let mut channels: HashMap<u32, String> = HashMap::new();
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];

    while !shared.stop.load(Ordering::SeqCst) {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue
            }
            Err(_) => break,
        }
        while pending.len() >= HEADER_SIZE {
            let Ok((header, used)) = MessageHeader::decode(&pending) else {
                break;
            };
            let total = used + header.payload_size as usize;
            if pending.len() < total {
                break;
            }
            let body: Vec<u8> = pending[used..total].to_vec();
            pending.drain(..total);
            handle(&shared, conn, &writer, &mut channels, &header, &body);
        }
    }
    if let Some(slot) = shared.conns.lock().get_mut(conn) {
        *slot = None;
    }
    shared.subs.lock().retain(|s| s.conn != conn);
}

fn handle(
    shared: &Shared,
    conn: usize,
    writer: &Writer,
    channels: &mut HashMap<u32, String>,
    header: &MessageHeader,
    body: &[u8],
) {
    match header.command {
        command::VERSION => {
            reply(
                writer,
                MessageHeader::new(command::VERSION).with_type(0, u32::from(MinorVersion::CLIENT.0)),
                &[],
            );
        }
        command::CREATE_CHAN => {
            let cid = header.param1;
            let name = String::from_utf8_lossy(body.split(|&b| b == 0).next().unwrap_or_default()).into_owned();
            let Some(pv) = shared.pvs.lock().get(&name).cloned() else {
                reply(writer, MessageHeader::new(command::CREATE_CH_FAIL).with_params(cid, 0), &[]);
                return;
            };
            let sid = shared.next_sid.fetch_add(1, Ordering::SeqCst);
            channels.insert(sid, name);
            let rights = if pv.writable { 3 } else { 1 };
            reply(writer, MessageHeader::new(command::ACCESS_RIGHTS).with_params(cid, rights), &[]);
            reply(
                writer,
                MessageHeader::new(command::CREATE_CHAN)
                    .with_type(pv.dbr.code(), pv.count)
                    .with_params(cid, sid),
                &[],
            );
        }
        command::READ_NOTIFY => {
            if shared.muted.load(Ordering::SeqCst) {
                return;
            }
            let Some(pv) = channels.get(&header.param1).and_then(|n| shared.pvs.lock().get(n).cloned()) else {
                return;
            };
            let (count, value) = sized(&pv, header.count);
            let response = MessageHeader::new(command::READ_NOTIFY)
                .with_type(pv.dbr.code(), count)
                .with_params(Status::NORMAL.raw(), header.param2);
            reply(writer, response, &value);
        }
        command::WRITE | command::WRITE_NOTIFY => {
            let Some(name) = channels.get(&header.param1).cloned() else {
                return;
            };
            let writable = {
                let mut pvs = shared.pvs.lock();
                match pvs.get_mut(&name) {
                    Some(pv) if pv.writable && !pv.rejects => {
                        let len = pv.dbr.size_n(header.count).min(body.len());
                        pv.value = body[..len].to_vec();
                        true
                    }
                    _ => false,
                }
            };
            if header.command == command::WRITE_NOTIFY {
                let status = if writable { Status::NORMAL } else { Status::PUTFAIL };
                let response = MessageHeader::new(command::WRITE_NOTIFY)
                    .with_type(header.data_type, header.count)
                    .with_params(status.raw(), header.param2);
                reply(writer, response, &[]);
            }
            if writable {
                post_updates(shared, &name);
            }
        }
        command::EVENT_ADD => {
            let Some(name) = channels.get(&header.param1).cloned() else {
                return;
            };
            let Ok(dbr) = DbrType::new(header.data_type) else {
                return;
            };
            shared.subs.lock().push(Sub {
                conn,
                name: name.clone(),
                subid: header.param2,
                dbr,
                count: header.count,
            });
            post_updates_to(shared, &name, conn, header.param2);
        }
        command::EVENT_CANCEL => {
            shared
                .subs
                .lock()
                .retain(|s| !(s.conn == conn && s.subid == header.param2));
            let response = MessageHeader::new(command::EVENT_ADD)
                .with_type(header.data_type, header.count)
                .with_params(header.param1, header.param2);
            reply(writer, response, &[]);
        }
        command::CLEAR_CHANNEL => {
            channels.remove(&header.param1);
            let response = MessageHeader::new(command::CLEAR_CHANNEL).with_params(header.param2, header.param1);
            reply(writer, response, &[]);
        }
        command::ECHO => reply(writer, MessageHeader::new(command::ECHO), &[]),
        _ => {}
    }
}

/// Initial update for a fresh subscription.
fn post_updates_to(shared: &Shared, name: &str, conn: usize, subid: u32) {
    let Some(pv) = shared.pvs.lock().get(name).cloned() else {
        return;
    };
    let conns = shared.conns.lock();
    let subs = shared.subs.lock();
    let Some(sub) = subs.iter().find(|s| s.conn == conn && s.subid == subid) else {
        return;
    };
    let Some(Some(writer)) = conns.get(conn) else {
        return;
    };
    let (count, value) = sized(&pv, sub.count);
    let header = MessageHeader::new(command::EVENT_ADD)
        .with_type(sub.dbr.code(), count)
        .with_params(Status::NORMAL.raw(), subid);
    reply(writer, header, &value);
}

// ============================================================================
// Resolver and notify targets
// ============================================================================

/// Points hosted names at the fake server, from its own thread. Unknown
/// names are never answered.
pub struct StaticResolver {
    server: SocketAddr,
    shared: Arc<Shared>,
    pub searches: AtomicU32,
}

impl NameResolver for StaticResolver {
    fn search(&self, request: SearchRequest) {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if !self.shared.pvs.lock().contains_key(&request.name) {
            return;
        }
        let server = self.server;
        thread::spawn(move || {
            let _ = request.replier.found(server, MinorVersion::CLIENT);
        });
    }

    fn cancel(&self, _channel: ChannelId) {}
}

#[derive(Default)]
pub struct ChannelEvents {
    pub connects: AtomicU32,
    pub disconnects: AtomicU32,
    pub rights: AtomicU32,
    pub log: Mutex<Vec<&'static str>>,
}

impl ChannelNotify for ChannelEvents {
    fn connect_notify(&self, _channel: ChannelId) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push("connect");
    }

    fn disconnect_notify(&self, _channel: ChannelId) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push("disconnect");
    }

    fn access_rights_notify(&self, _channel: ChannelId, _rights: chanaccess::AccessRights) {
        self.rights.fetch_add(1, Ordering::SeqCst);
    }
}

/// Outcome slot for one read or write.
#[derive(Default)]
pub struct Completion {
    pub value: Mutex<Option<Result<Vec<u8>, Status>>>,
    pub calls: AtomicU32,
}

impl Completion {
    pub fn wait(&self) -> Option<Result<Vec<u8>, Status>> {
        wait_for(WAIT, || self.value.lock().is_some());
        self.value.lock().clone()
    }

    fn set(&self, outcome: Result<Vec<u8>, Status>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.value.lock() = Some(outcome);
    }
}

impl ReadNotify for Completion {
    fn completion(&self, _dbr: DbrType, _count: u32, data: &[u8]) {
        self.set(Ok(data.to_vec()));
    }

    fn exception(&self, status: Status, _context: &str, _dbr: DbrType, _count: u32) {
        self.set(Err(status));
    }
}

impl WriteNotify for Completion {
    fn completion(&self) {
        self.set(Ok(Vec::new()));
    }

    fn exception(&self, status: Status, _context: &str, _dbr: DbrType, _count: u32) {
        self.set(Err(status));
    }
}

/// Collects subscription updates.
#[derive(Default)]
pub struct Updates {
    pub values: Mutex<Vec<Vec<u8>>>,
    pub errors: Mutex<Vec<Status>>,
}

impl Updates {
    pub fn count(&self) -> usize {
        self.values.lock().len()
    }
}

impl StateNotify for Updates {
    fn current(&self, _dbr: DbrType, _count: u32, data: &[u8]) {
        self.values.lock().push(data.to_vec());
    }

    fn exception(&self, status: Status, _context: &str, _dbr: DbrType, _count: u32) {
        self.errors.lock().push(status);
    }
}

/// Collects context exceptions.
#[derive(Default)]
pub struct Exceptions {
    pub seen: Mutex<Vec<Status>>,
}

impl ContextNotify for Exceptions {
    fn exception(&self, status: Status, _context: &str, _server: Option<SocketAddr>) {
        self.seen.lock().push(status);
    }
}
