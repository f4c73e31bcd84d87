// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monitoring subscriber: collects logs and metrics from a constellation.
//!
//! Discovers MONITORING services via the beacon and subscribes to each with
//! `LOG/` and `STATS/` filters. Received log records are routed through the
//! local console path (and a group log file when an output directory is
//! configured); metric samples append to per-metric CSV files, or print
//! when no output directory is set. Socket add/remove and the poll loop are
//! serialised by one lock so a beacon-driven removal cannot race the
//! receive path.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::Token;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::beacon::BroadcastManager;
use crate::error::Result;
use crate::protocol::{CmdpMessage, Metric, ServiceKind};
use crate::transport::{FramedStream, StreamPoller};

const POLL_TIMEOUT: Duration = Duration::from_millis(250);

struct ListenerState {
    poller: StreamPoller,
    peers: HashMap<Token, Uuid>,
}

struct ListenerInner {
    state: Mutex<ListenerState>,
    output_path: Option<PathBuf>,
    log_file: Option<Mutex<File>>,
}

pub struct MonitoringListener {
    beacon: Arc<BroadcastManager>,
    inner: Arc<ListenerInner>,
}

impl MonitoringListener {
    /// Set up the listener: output directories, beacon discovery, and the
    /// MONITORING callback. `output_path` empty means print-only mode.
    pub fn new(name: &str, group: &str, interface: &str, output_path: &str) -> Result<Self> {
        let (output_path, log_file) = if output_path.is_empty() {
            (None, None)
        } else {
            let base = PathBuf::from(output_path);
            std::fs::create_dir_all(base.join("logs"))?;
            std::fs::create_dir_all(base.join("stats"))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(base.join("logs").join(format!("{}.log", group)))?;
            (Some(base), Some(Mutex::new(file)))
        };

        let inner = Arc::new(ListenerInner {
            state: Mutex::new(ListenerState {
                poller: StreamPoller::new()?,
                peers: HashMap::new(),
            }),
            output_path,
            log_file,
        });

        let beacon = BroadcastManager::new(name, group, interface)?;
        {
            let inner = Arc::clone(&inner);
            beacon.register_callback(
                ServiceKind::Monitoring,
                Box::new(move |service| {
                    let addr = SocketAddr::new(service.address, service.port);
                    if service.alive {
                        if let Err(e) = inner.add_peer(service.host_uuid, addr) {
                            log::warn!("[MON] could not subscribe to {}: {}", addr, e);
                        }
                    } else {
                        inner.remove_peer(service.host_uuid);
                    }
                }),
            );
        }
        beacon.start();
        beacon.request(ServiceKind::Monitoring);

        Ok(MonitoringListener { beacon, inner })
    }

    pub fn beacon(&self) -> &Arc<BroadcastManager> {
        &self.beacon
    }

    /// Number of currently subscribed peers.
    pub fn peer_count(&self) -> usize {
        self.inner.state.lock().peers.len()
    }

    /// Subscribe to a peer directly (tests and static setups).
    pub fn add_peer(&self, uuid: Uuid, addr: SocketAddr) -> Result<()> {
        self.inner.add_peer(uuid, addr)
    }

    /// Receive loop; returns when `stop` is set.
    pub fn run(&self, stop: &Arc<AtomicBool>) {
        log::info!("[MON] listening for logs and metrics");
        while !stop.load(Ordering::Relaxed) {
            let events = {
                let mut state = self.inner.state.lock();
                match state.poller.poll(POLL_TIMEOUT) {
                    Ok(events) => events,
                    Err(e) => {
                        log::warn!("[MON] poll failed: {}", e);
                        drop(state);
                        std::thread::sleep(POLL_TIMEOUT);
                        continue;
                    }
                }
            };
            for event in events {
                for msg in &event.messages {
                    match CmdpMessage::decode(msg) {
                        Ok(CmdpMessage::Log(record)) => self.inner.handle_log(&record),
                        Ok(CmdpMessage::Metric(metric)) => self.inner.handle_metric(&metric),
                        Err(e) => log::warn!("[MON] {}", e),
                    }
                }
                if event.closed {
                    let mut state = self.inner.state.lock();
                    let _ = state.poller.remove(event.token);
                    state.peers.remove(&event.token);
                }
            }
        }
        self.shutdown();
    }

    fn shutdown(&self) {
        self.beacon.shutdown();
        let mut state = self.inner.state.lock();
        let tokens: Vec<Token> = state.peers.keys().copied().collect();
        for token in tokens {
            let _ = state.poller.remove(token);
        }
        state.peers.clear();
    }
}

impl ListenerInner {
    fn add_peer(&self, uuid: Uuid, addr: SocketAddr) -> Result<()> {
        let mut state = self.state.lock();
        if state.peers.values().any(|u| *u == uuid) {
            return Ok(());
        }
        let stream = FramedStream::connect(addr)?;
        let token = state.poller.add(stream)?;
        state.peers.insert(token, uuid);
        log::info!("[MON] subscribed to {} at {}", uuid, addr);
        Ok(())
    }

    fn remove_peer(&self, uuid: Uuid) {
        let mut state = self.state.lock();
        let token = state
            .peers
            .iter()
            .find(|(_, u)| **u == uuid)
            .map(|(t, _)| *t);
        if let Some(token) = token {
            let _ = state.poller.remove(token);
            state.peers.remove(&token);
            log::info!("[MON] departure of {}", uuid);
        }
    }

    fn handle_log(&self, record: &crate::protocol::LogRecord) {
        super::logging::emit_remote(record);
        if let Some(file) = &self.log_file {
            let secs = record.timestamp_ns / 1_000_000_000;
            let line = format!(
                "{} - {} - {} - {}\n",
                secs,
                record.sender,
                record.level.label(),
                record.message
            );
            if let Err(e) = file.lock().write_all(line.as_bytes()) {
                log::warn!("[MON] log file write failed: {}", e);
            }
        }
    }

    fn handle_metric(&self, metric: &Metric) {
        match &self.output_path {
            Some(base) => {
                let fname = format!("{}_{}.csv", metric.sender, metric.name.to_lowercase());
                let path = base.join("stats").join(fname);
                let secs = metric.timestamp_ns / 1_000_000_000;
                let line = format!("{}, {}, '{}'\n", secs, metric.value, metric.unit);
                let appended = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .and_then(|mut f| f.write_all(line.as_bytes()));
                if let Err(e) = appended {
                    log::warn!("[MON] stats file write failed: {}", e);
                }
            }
            None => {
                println!(
                    "{}: {} [{}] from {}",
                    metric.name, metric.value, metric.unit, metric.sender
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::sender::MonitoringSender;
    use crate::protocol::chirp::name_uuid;
    use crate::protocol::pack::Value;
    use crate::protocol::MetricsType;

    #[test]
    fn test_metrics_land_in_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_str().unwrap();

        let sender = Arc::new(MonitoringSender::bind("sat_csv", "127.0.0.1", 0).unwrap());
        sender.schedule_metric(
            "temp",
            "C",
            MetricsType::LastValue,
            Duration::from_millis(50),
            Box::new(|| Ok(Value::F64(21.5))),
        );

        let listener = MonitoringListener::new("monitor", "g_csv_test", "127.0.0.1", out).unwrap();
        listener
            .add_peer(
                name_uuid("sat_csv"),
                SocketAddr::from(([127, 0, 0, 1], sender.port())),
            )
            .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let sender_stop = Arc::clone(&stop);
        let sender_worker = {
            let sender = Arc::clone(&sender);
            std::thread::spawn(move || sender.run(&sender_stop))
        };
        let listener_stop = Arc::clone(&stop);
        let listener_worker = std::thread::spawn(move || {
            listener.run(&listener_stop);
        });

        let csv = dir.path().join("stats").join("sat_csv_temp.csv");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut content = String::new();
        while std::time::Instant::now() < deadline {
            if let Ok(c) = std::fs::read_to_string(&csv) {
                if !c.is_empty() {
                    content = c;
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(content.contains("21.5"));
        assert!(content.contains("'C'"));

        stop.store(true, Ordering::Relaxed);
        sender_worker.join().unwrap();
        listener_worker.join().unwrap();
    }
}
