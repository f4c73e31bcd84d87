// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The data consumer framework.
//!
//! `DataReceiver` is a [`SatelliteHandler`]: `launch` connects to every
//! discovered DATA producer, `start` opens the writer, the run loop polls
//! all connections with a 250 ms timeout and hands each decoded message to
//! the writer. After `stop` fires the cancellation token the loop keeps
//! draining for a grace period to capture the trailing EOR and in-flight
//! data. A producer whose DAT arrives before its BOR is marked as a late
//! joiner: a warning is logged and an empty BOR is synthesised into the
//! local record, the data is never discarded. Sequence gaps are reported at
//! WARNING and not retransmitted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use mio::Token;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::beacon::BroadcastManager;
use crate::config::Configuration;
use crate::error::Result;
use crate::protocol::pack::{self, MetaMap};
use crate::protocol::{CdtpMessage, DataKind, ServiceKind};
use crate::satellite::{CancellationToken, SatelliteHandler};
use crate::transport::{FramedStream, StreamPoller};

use super::{DRAIN_GRACE, RECEIVE_POLL};

/// Consumer of decoded run messages (the write callback of the receiver).
pub trait RunWriter: Send + 'static {
    /// Read writer-specific configuration during `initializing`.
    fn configure(&mut self, _config: &mut Configuration) -> Result<()> {
        Ok(())
    }

    /// A run begins (entry to RUN).
    fn open(&mut self, run_id: &str) -> Result<()>;

    /// One decoded message, in per-sender sequence order.
    fn write(&mut self, msg: &CdtpMessage) -> Result<()>;

    /// Periodic flush, paced by the `flush_interval` configuration key.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// The run is over (writer must release the file).
    fn close(&mut self) -> Result<()>;
}

/// Producers known to the receiver, fed by the beacon DATA callback.
///
/// The beacon listener only records changes here; the receiver applies them
/// from its own threads (launch and the run loop), so the service table
/// lock is never held across a connect.
#[derive(Default)]
pub struct SourceTable {
    inner: Mutex<SourceTableInner>,
}

#[derive(Default)]
struct SourceTableInner {
    known: HashMap<Uuid, SocketAddr>,
    pending_add: Vec<(Uuid, SocketAddr)>,
    pending_remove: Vec<Uuid>,
}

impl SourceTable {
    /// Wire this table to beacon DATA offers and ask the group to
    /// re-offer. Call with the beacon of the satellite hosting the
    /// receiver (also after the receiver moved into the runtime).
    pub fn register_discovery(self: &Arc<Self>, beacon: &Arc<BroadcastManager>) {
        let sources = Arc::clone(self);
        beacon.register_callback(
            ServiceKind::Data,
            Box::new(move |service| {
                let addr = SocketAddr::new(service.address, service.port);
                if service.alive {
                    log::info!("[CDTP] data producer offered at {}", addr);
                    sources.add(service.host_uuid, addr);
                } else {
                    sources.remove(service.host_uuid);
                }
            }),
        );
        beacon.request(ServiceKind::Data);
    }

    pub fn add(&self, uuid: Uuid, addr: SocketAddr) {
        let mut inner = self.inner.lock();
        inner.known.insert(uuid, addr);
        inner.pending_add.push((uuid, addr));
    }

    pub fn remove(&self, uuid: Uuid) {
        let mut inner = self.inner.lock();
        inner.known.remove(&uuid);
        inner.pending_remove.push(uuid);
    }

    pub fn known(&self) -> Vec<(Uuid, SocketAddr)> {
        self.inner
            .lock()
            .known
            .iter()
            .map(|(u, a)| (*u, *a))
            .collect()
    }

    fn take_pending(&self) -> (Vec<(Uuid, SocketAddr)>, Vec<Uuid>) {
        let mut inner = self.inner.lock();
        (
            std::mem::take(&mut inner.pending_add),
            std::mem::take(&mut inner.pending_remove),
        )
    }
}

struct SenderProgress {
    in_run: bool,
    last_seq: u64,
}

/// Satellite handler receiving CDTP streams into a [`RunWriter`].
pub struct DataReceiver<W: RunWriter> {
    writer: W,
    sources: Arc<SourceTable>,
    poller: Option<StreamPoller>,
    connected: HashMap<Token, Uuid>,
    progress: HashMap<String, SenderProgress>,
    flush_interval: f64,
    messages_received: u64,
}

impl<W: RunWriter> DataReceiver<W> {
    pub fn new(writer: W) -> Self {
        DataReceiver {
            writer,
            sources: Arc::new(SourceTable::default()),
            poller: None,
            connected: HashMap::new(),
            progress: HashMap::new(),
            flush_interval: 10.0,
            messages_received: 0,
        }
    }

    /// Shared source table (for tests and static peer setups).
    pub fn sources(&self) -> Arc<SourceTable> {
        Arc::clone(&self.sources)
    }

    /// Wire the source table to beacon DATA offers and ask the group to
    /// re-offer.
    pub fn register_discovery(&self, beacon: &Arc<BroadcastManager>) {
        self.sources.register_discovery(beacon);
    }

    fn apply_source_changes(&mut self) {
        let Some(poller) = self.poller.as_mut() else {
            return;
        };
        let (add, remove) = self.sources.take_pending();
        for (uuid, addr) in add {
            if self.connected.values().any(|u| *u == uuid) {
                continue;
            }
            match FramedStream::connect(addr).and_then(|s| poller.add(s)) {
                Ok(token) => {
                    log::info!("[CDTP] connected to producer at {}", addr);
                    self.connected.insert(token, uuid);
                }
                Err(e) => log::warn!("[CDTP] connect to {} failed: {}", addr, e),
            }
        }
        for uuid in remove {
            let token = self
                .connected
                .iter()
                .find(|(_, u)| **u == uuid)
                .map(|(t, _)| *t);
            if let Some(token) = token {
                let _ = poller.remove(token);
                self.connected.remove(&token);
            }
        }
    }

    fn handle_message(&mut self, msg: CdtpMessage) -> Result<()> {
        self.messages_received += 1;
        match msg.kind {
            DataKind::Bor => {
                self.progress.insert(
                    msg.sender.clone(),
                    SenderProgress {
                        in_run: true,
                        last_seq: 0,
                    },
                );
                log::info!("[CDTP] BOR from {}", msg.sender);
                self.writer.write(&msg)
            }
            DataKind::Dat => {
                let known = self
                    .progress
                    .get(&msg.sender)
                    .map(|p| p.in_run)
                    .unwrap_or(false);
                if !known {
                    // late joiner: synthesise an empty BOR, keep the data
                    log::warn!(
                        "[CDTP] late joiner: {} sent data without BOR",
                        msg.sender
                    );
                    let synthetic = CdtpMessage {
                        sender: msg.sender.clone(),
                        timestamp_ns: pack::now_nanos(),
                        kind: DataKind::Bor,
                        seq: 0,
                        meta: MetaMap::new(),
                        payload: Vec::new(),
                    };
                    self.writer.write(&synthetic)?;
                    self.progress.insert(
                        msg.sender.clone(),
                        SenderProgress {
                            in_run: true,
                            last_seq: msg.seq.saturating_sub(1),
                        },
                    );
                }
                if let Some(progress) = self.progress.get_mut(&msg.sender) {
                    let expected = progress.last_seq + 1;
                    if msg.seq != expected {
                        log::warn!(
                            "[CDTP] sequence gap from {}: expected {}, got {}",
                            msg.sender,
                            expected,
                            msg.seq
                        );
                    }
                    progress.last_seq = msg.seq;
                }
                self.writer.write(&msg)
            }
            DataKind::Eor => {
                if let Some(progress) = self.progress.get_mut(&msg.sender) {
                    progress.in_run = false;
                }
                log::info!("[CDTP] EOR from {}", msg.sender);
                self.writer.write(&msg)
            }
        }
    }
}

impl<W: RunWriter> SatelliteHandler for DataReceiver<W> {
    fn class_name(&self) -> &'static str {
        "DataReceiver"
    }

    fn do_initializing(&mut self, config: &mut Configuration) -> Result<String> {
        self.flush_interval = config.get_f64_or("flush_interval", 10.0)?;
        self.writer.configure(config)?;
        Ok("configured".into())
    }

    fn do_launching(&mut self) -> Result<String> {
        let mut poller = StreamPoller::new()?;
        let mut connected = HashMap::new();
        for (uuid, addr) in self.sources.known() {
            match FramedStream::connect(addr).and_then(|s| poller.add(s)) {
                Ok(token) => {
                    connected.insert(token, uuid);
                }
                Err(e) => log::warn!("[CDTP] connect to {} failed: {}", addr, e),
            }
        }
        // changes queued before launch are covered by the snapshot
        let _ = self.sources.take_pending();
        let count = connected.len();
        self.poller = Some(poller);
        self.connected = connected;
        Ok(format!("connected to {} data producers", count))
    }

    fn do_landing(&mut self) -> Result<String> {
        self.poller = None;
        self.connected.clear();
        Ok("closed connections to data producers".into())
    }

    fn do_starting(&mut self, run_id: &str) -> Result<String> {
        self.progress.clear();
        self.messages_received = 0;
        self.writer.open(run_id)?;
        Ok(format!("acquiring run {}", run_id))
    }

    fn do_run(&mut self, token: &CancellationToken) -> Result<String> {
        let mut last_flush = Instant::now();
        let mut keep_alive = Instant::now();
        let result = loop {
            // drain a while after the stop request before closing
            if token.is_cancelled() {
                if keep_alive.elapsed() >= DRAIN_GRACE {
                    break Ok(());
                }
            } else {
                keep_alive = Instant::now();
            }

            self.apply_source_changes();

            let events = {
                let Some(poller) = self.poller.as_mut() else {
                    break Err(crate::Error::InvalidState {
                        reason: "run loop without launched poller".into(),
                    });
                };
                match poller.poll(RECEIVE_POLL) {
                    Ok(events) => events,
                    Err(e) => break Err(e),
                }
            };
            let mut failed = None;
            for event in events {
                for frames in &event.messages {
                    match CdtpMessage::decode(frames) {
                        Ok(msg) => {
                            if let Err(e) = self.handle_message(msg) {
                                failed = Some(e);
                            }
                        }
                        Err(e) => log::warn!("[CDTP] {}", e),
                    }
                }
                if event.closed {
                    if let Some(poller) = self.poller.as_mut() {
                        let _ = poller.remove(event.token);
                    }
                    self.connected.remove(&event.token);
                }
            }
            if let Some(e) = failed {
                break Err(e);
            }

            if self.flush_interval > 0.0
                && last_flush.elapsed().as_secs_f64() > self.flush_interval
            {
                if let Err(e) = self.writer.flush() {
                    break Err(e);
                }
                last_flush = Instant::now();
            }
        };
        self.writer.close()?;
        result.map(|()| format!("finished acquisition, {} messages", self.messages_received))
    }

    fn do_interrupting(&mut self) -> Result<String> {
        self.poller = None;
        self.connected.clear();
        Ok("interrupted, connections closed".into())
    }
}
