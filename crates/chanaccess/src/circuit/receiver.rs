// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-circuit receive thread.
//!
//! Dials the server, hands the stream to the context, then decodes frames
//! and dispatches them in arrival order until the connection ends or the
//! circuit is aborted. The read timeout bounds how long an aborted circuit
//! keeps its thread.

use std::io::{self, BufReader};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::framing::FrameDecoder;
use super::priority;
use super::{CircuitId, ServerId};
use crate::config::SMALL_BUFFER_SIZE;
use crate::context::ContextCore;

pub(crate) fn spawn(
    core: Arc<ContextCore>,
    circuit: CircuitId,
    server: ServerId,
    service_level: u8,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("ca-{}-p{}", circuit, service_level))
        .spawn(move || {
            if let Err(e) = priority::apply_to_current_thread(core.config.base_thread_priority, service_level) {
                log::debug!("[circuit] {} service level {} not applied: {}", circuit, service_level, e);
            }
            run(&core, circuit, server)
        })
}

fn run(core: &ContextCore, circuit: CircuitId, server: ServerId) {
    let stream = match core.connector.connect(server.addr, core.config.connect_timeout) {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("[circuit] {} connect to {} failed: {}", circuit, server.addr, e);
            core.receive_exit(circuit, &format!("connect failed: {}", e));
            return;
        }
    };
    let reader = match core.circuit_connected(circuit, stream) {
        Ok(reader) => reader,
        Err(e) => {
            log::debug!("[circuit] {} not started: {}", circuit, e);
            core.receive_exit(circuit, &e.to_string());
            return;
        }
    };

    let mut reader = BufReader::with_capacity(SMALL_BUFFER_SIZE, reader);
    let mut decoder = FrameDecoder::new();
    let reason = loop {
        match decoder.decode(&mut reader, &core.buffers) {
            Ok(Some(frame)) => {
                if !core.execute_response(circuit, Instant::now(), &frame.header, frame.body) {
                    break "closed by dispatch".to_string();
                }
            }
            Ok(None) => {
                if core.circuit_stopping(circuit) {
                    break "stopped".to_string();
                }
            }
            Err(e) => break e.to_string(),
        }
    };
    log::debug!(
        "[circuit] {} receive loop ended after {} frame(s): {}",
        circuit,
        decoder.frames_decoded(),
        reason
    );
    core.receive_exit(circuit, &reason);
}
