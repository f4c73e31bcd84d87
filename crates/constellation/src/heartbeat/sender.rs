// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heartbeat publisher worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::fsm::Fsm;
use crate::protocol::Heartbeat;
use crate::transport::PubSocket;

use super::{DEFAULT_PERIOD_MS, PROMISE_FACTOR};

pub struct HeartbeatSender {
    socket: PubSocket,
    name: String,
    period_ms: u64,
}

impl HeartbeatSender {
    pub fn bind(name: &str, interface: &str, port: u16) -> Result<Self> {
        let socket = PubSocket::bind(interface, port)?;
        log::info!("[CHP] heartbeat publisher on port {}", socket.port());
        Ok(HeartbeatSender {
            socket,
            name: name.to_string(),
            period_ms: DEFAULT_PERIOD_MS,
        })
    }

    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    pub fn set_period_ms(&mut self, period_ms: u64) {
        self.period_ms = period_ms;
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    fn send(&self, fsm: &Fsm) {
        let promise = (self.period_ms as f64 * PROMISE_FACTOR) as u64;
        match Heartbeat::encode(&self.name, fsm.state() as u8, promise) {
            Ok(frames) => {
                if let Err(e) = self.socket.publish(&frames) {
                    log::warn!("[CHP] publish failed: {}", e);
                }
            }
            Err(e) => log::warn!("[CHP] encode failed: {}", e),
        }
    }

    /// Worker loop: one heartbeat per period, plus one immediately after
    /// every state change. Polls the state-change flag at 100 ms like the
    /// send path it feeds.
    pub fn run(&self, fsm: &Fsm, stop: &Arc<AtomicBool>) {
        log::debug!("[CHP] sender started");
        let mut last: Option<Instant> = None;
        while !stop.load(Ordering::Relaxed) {
            let due = last
                .map(|l| l.elapsed() >= Duration::from_millis(self.period_ms))
                .unwrap_or(true);
            if due || fsm.take_transitioned() {
                self.send(fsm);
                last = Some(Instant::now());
            } else {
                std::thread::sleep(Duration::from_millis(100));
            }
        }
        // last breath so subscribers see the final state without waiting
        // for the miss deadline
        self.send(fsm);
        log::debug!("[CHP] sender shutting down");
    }
}
