// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monitoring publisher worker.
//!
//! One socket serves both paths: log records drained from the in-process
//! queue and metric samples collected by the scheduler. The worker wakes
//! every 100 ms.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::Result;
use crate::protocol::pack::Value;
use crate::protocol::{LogRecord, Metric, MetricsType};
use crate::transport::PubSocket;

use super::logging;
use super::metrics::{MetricCallback, MetricsRegistry};

/// Scheduler wake-up cadence.
pub const SCHEDULER_TICK: Duration = Duration::from_millis(100);

pub struct MonitoringSender {
    socket: PubSocket,
    name: String,
    log_tx: Sender<LogRecord>,
    log_rx: Receiver<LogRecord>,
    metrics: Mutex<MetricsRegistry>,
}

impl MonitoringSender {
    pub fn bind(name: &str, interface: &str, port: u16) -> Result<Self> {
        let socket = PubSocket::bind(interface, port)?;
        log::info!("[CMDP] monitoring publisher on port {}", socket.port());
        let (log_tx, log_rx) = unbounded();
        Ok(MonitoringSender {
            socket,
            name: name.to_string(),
            log_tx,
            log_rx,
            metrics: Mutex::new(MetricsRegistry::new()),
        })
    }

    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    /// Tee the process log onto this sender's queue.
    pub fn attach_logging(&self) {
        logging::attach_forwarder(&self.name, self.log_tx.clone());
    }

    /// Register a scheduled metric callback.
    pub fn schedule_metric(
        &self,
        name: &str,
        unit: &str,
        handling: MetricsType,
        interval: Duration,
        callback: MetricCallback,
    ) {
        self.metrics
            .lock()
            .schedule(name, unit, handling, interval, callback);
    }

    /// Publish one metric sample immediately (outside the scheduler).
    pub fn send_metric(
        &self,
        name: &str,
        unit: &str,
        handling: MetricsType,
        value: Value,
    ) -> Result<()> {
        let metric = Metric {
            name: name.to_string(),
            unit: unit.to_string(),
            handling,
            value,
            sender: self.name.clone(),
            timestamp_ns: crate::protocol::pack::now_nanos(),
            meta: Default::default(),
        };
        self.socket.publish(&metric.encode()?)
    }

    fn publish_record(&self, record: &LogRecord) {
        match record.encode() {
            Ok(frames) => {
                let _ = self.socket.publish(&frames);
            }
            Err(e) => eprintln!("log record encode failed: {}", e),
        }
    }

    /// Worker loop: drain the log queue, then poll the metric scheduler.
    pub fn run(&self, stop: &Arc<AtomicBool>) {
        log::debug!("[CMDP] publisher started");
        while !stop.load(Ordering::Relaxed) {
            // block on the queue for the tick, then drain what piled up
            match self.log_rx.recv_timeout(SCHEDULER_TICK) {
                Ok(record) => {
                    self.publish_record(&record);
                    while let Ok(record) = self.log_rx.try_recv() {
                        self.publish_record(&record);
                    }
                }
                Err(_) => {}
            }
            let samples = self.metrics.lock().collect_due(&self.name);
            for metric in samples {
                match metric.encode() {
                    Ok(frames) => {
                        let _ = self.socket.publish(&frames);
                    }
                    Err(e) => log::error!("[CMDP] metric encode failed: {}", e),
                }
            }
        }
        logging::detach_forwarder();
        // flush what the queue still holds
        while let Ok(record) = self.log_rx.try_recv() {
            self.publish_record(&record);
        }
        log::debug!("[CMDP] publisher shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CmdpMessage;
    use crate::transport::SubSocket;
    use std::net::SocketAddr;

    fn recv_cmdp(sub: &mut SubSocket, tries: usize) -> Option<CmdpMessage> {
        for _ in 0..tries {
            if let Some(msg) = sub.recv(Duration::from_millis(50)).unwrap() {
                return Some(CmdpMessage::decode(&msg).unwrap());
            }
        }
        None
    }

    #[test]
    fn test_scheduled_metric_reaches_subscriber() {
        let sender = Arc::new(MonitoringSender::bind("sat_a", "127.0.0.1", 0).unwrap());
        sender.schedule_metric(
            "rate",
            "Hz",
            MetricsType::Rate,
            Duration::from_millis(50),
            Box::new(|| Ok(Value::F64(1.5))),
        );

        let mut sub =
            SubSocket::connect(SocketAddr::from(([127, 0, 0, 1], sender.port()))).unwrap();
        sub.subscribe(&b"STATS/"[..]);

        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let sender = Arc::clone(&sender);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || sender.run(&stop))
        };

        let msg = recv_cmdp(&mut sub, 100).expect("metric");
        match msg {
            CmdpMessage::Metric(m) => {
                assert_eq!(m.name, "RATE");
                assert_eq!(m.unit, "Hz");
                assert_eq!(m.sender, "sat_a");
            }
            other => panic!("expected metric, got {:?}", other),
        }

        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
    }

    #[test]
    fn test_queued_log_records_are_published() {
        let sender = Arc::new(MonitoringSender::bind("sat_b", "127.0.0.1", 0).unwrap());

        let mut sub =
            SubSocket::connect(SocketAddr::from(([127, 0, 0, 1], sender.port()))).unwrap();
        sub.subscribe(&b"LOG/"[..]);

        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let sender = Arc::clone(&sender);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || sender.run(&stop))
        };

        // push straight onto the queue (bypassing the global logger keeps
        // the test independent of other tests' logger state)
        sender
            .log_tx
            .send(LogRecord {
                sender: "sat_b".into(),
                level: crate::protocol::LogLevel::Info,
                logger: "FSM".into(),
                message: "launched".into(),
                timestamp_ns: crate::protocol::pack::now_nanos(),
                meta: Default::default(),
            })
            .unwrap();

        let msg = recv_cmdp(&mut sub, 100).expect("log record");
        match msg {
            CmdpMessage::Log(record) => {
                assert_eq!(record.sender, "sat_b");
                assert_eq!(record.message, "launched");
            }
            other => panic!("expected log, got {:?}", other),
        }

        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
    }
}
