// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic timer thread driving echo probes and abort deadlines.

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::ContextCore;

/// Timer thread plus its stop channel.
///
/// Dropping the sender disconnects the channel, which wakes the thread out
/// of `recv_timeout`; the thread is then joined.
pub(crate) struct TimerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub(crate) fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("[timer] thread panicked");
            }
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn spawn(core: Weak<ContextCore>, tick: Duration) -> io::Result<TimerHandle> {
    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let thread = thread::Builder::new()
        .name("ca-timer".to_string())
        .spawn(move || loop {
            match stop_rx.recv_timeout(tick) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            let Some(core) = core.upgrade() else {
                break;
            };
            core.timer_tick(Instant::now());
        })?;
    Ok(TimerHandle {
        stop: Some(stop_tx),
        thread: Some(thread),
    })
}
