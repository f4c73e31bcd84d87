// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The process-wide logger.
//!
//! Console output plus an optional forwarder that tees every record onto an
//! in-process queue; the monitoring publisher worker drains that queue and
//! puts the records on the wire. Queueing decouples logging latency from
//! the network: a `log::warn!` call never blocks on a socket.

use std::sync::OnceLock;

use crossbeam::channel::Sender;
use log::{Level, LevelFilter, Metadata, Record};
use parking_lot::RwLock;

use crate::protocol::pack::{self, MetaMap, Value};
use crate::protocol::{LogLevel, LogRecord};

struct Forwarder {
    sender_name: String,
    queue: Sender<LogRecord>,
}

struct ConstellationLogger {
    forward: RwLock<Option<Forwarder>>,
}

static LOGGER: OnceLock<ConstellationLogger> = OnceLock::new();

fn logger() -> &'static ConstellationLogger {
    LOGGER.get_or_init(|| ConstellationLogger {
        forward: RwLock::new(None),
    })
}

impl log::Log for ConstellationLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = LogLevel::from(record.level());
        eprintln!("[{}] [{}] {}", level.label(), record.target(), record.args());

        let forward = self.forward.read();
        if let Some(forwarder) = forward.as_ref() {
            let mut meta = MetaMap::new();
            if let Some(module) = record.module_path() {
                meta.insert("module".into(), Value::from(module));
            }
            if let Some(file) = record.file() {
                meta.insert("file".into(), Value::from(file));
            }
            if let Some(line) = record.line() {
                meta.insert("line".into(), Value::from(u64::from(line)));
            }
            if let Some(thread) = std::thread::current().name() {
                meta.insert("thread".into(), Value::from(thread));
            }
            let _ = forwarder.queue.try_send(LogRecord {
                sender: forwarder.sender_name.clone(),
                level,
                logger: record.target().to_string(),
                message: record.args().to_string(),
                timestamp_ns: pack::now_nanos(),
                meta,
            });
        }
    }

    fn flush(&self) {}
}

/// Install the process logger at the given console level. Safe to call more
/// than once; later calls only adjust the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(logger());
    log::set_max_level(level);
}

/// Parse a `--log-level` string.
pub fn parse_level(s: &str) -> Option<LevelFilter> {
    match s.to_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warning" | "warn" => Some(LevelFilter::Warn),
        "error" | "critical" => Some(LevelFilter::Error),
        _ => None,
    }
}

/// Tee records onto the monitoring queue under the satellite's canonical
/// name (the monitoring publisher drains it).
pub(crate) fn attach_forwarder(sender_name: &str, queue: Sender<LogRecord>) {
    *logger().forward.write() = Some(Forwarder {
        sender_name: sender_name.to_string(),
        queue,
    });
}

pub(crate) fn detach_forwarder() {
    *logger().forward.write() = None;
}

/// Re-emit a record received from a remote peer through the local console
/// path (monitoring listener).
pub fn emit_remote(record: &LogRecord) {
    let level: Level = record.level.into();
    if level <= log::max_level() {
        eprintln!(
            "[{}] [{}@{}] {}",
            record.level.label(),
            record.logger,
            record.sender,
            record.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_forwarder_receives_records() {
        init(LevelFilter::Debug);
        let (tx, rx) = unbounded();
        attach_forwarder("sat_test", tx);

        log::warn!(target: "CHIRP_TEST", "malformed packet");

        // other tests may log concurrently; look for our record
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let record = loop {
            let record = rx
                .recv_timeout(std::time::Duration::from_millis(100))
                .ok()
                .filter(|r| r.logger == "CHIRP_TEST");
            if let Some(record) = record {
                break record;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "forwarded record never arrived"
            );
        };
        detach_forwarder();

        assert_eq!(record.sender, "sat_test");
        assert_eq!(record.level, LogLevel::Warning);
        assert_eq!(record.message, "malformed packet");
        assert!(record.meta.contains_key("module"));
    }
}
