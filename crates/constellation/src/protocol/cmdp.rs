// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CMDP monitoring messages: log records and metrics.
//!
//! Both travel as `[topic, header, payload]`. Log topics are
//! `LOG/<LEVEL>/<LOGGER>`, the payload is the formatted message text and the
//! header meta carries everything needed to reconstruct the record at the
//! subscriber (logger, module, file, line, thread). Metric topics are
//! `STATS/<NAME>`, the payload is msgpack `[value, handling, unit]`.
//! Topics are uppercased on the wire; subscribers filter on the `LOG/` and
//! `STATS/` prefixes.

use super::header::MessageHeader;
use super::pack::{self, MetaMap, Value};
use super::Protocol;
use crate::error::{Error, Result};

/// Log severity carried in CMDP topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(Error::protocol(format!("unknown log level '{}'", other))),
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => LogLevel::Trace,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Info => LogLevel::Info,
            log::Level::Warn => LogLevel::Warning,
            log::Level::Error => LogLevel::Error,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error | LogLevel::Critical => log::Level::Error,
        }
    }
}

/// A log record in transit between satellites and monitors.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub sender: String,
    pub level: LogLevel,
    pub logger: String,
    pub message: String,
    pub timestamp_ns: u64,
    /// module/file/line/thread attributes, preserved verbatim.
    pub meta: MetaMap,
}

impl LogRecord {
    fn topic(&self) -> String {
        format!("LOG/{}/{}", self.level.label(), self.logger).to_uppercase()
    }

    pub fn encode(&self) -> Result<Vec<Vec<u8>>> {
        let mut header = MessageHeader::new(Protocol::Cmdp, &self.sender);
        header.timestamp_ns = self.timestamp_ns;
        header.meta = self.meta.clone();
        header
            .meta
            .insert("level".into(), Value::from(self.level.label()));
        header
            .meta
            .insert("logger".into(), Value::from(self.logger.as_str()));
        Ok(vec![
            self.topic().into_bytes(),
            header.encode()?,
            self.message.clone().into_bytes(),
        ])
    }

    fn decode(topic: &str, frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() != 3 {
            return Err(Error::protocol(format!(
                "CMDP log message has {} frames instead of 3",
                frames.len()
            )));
        }
        let mut parts = topic.splitn(3, '/');
        let _ = parts.next();
        let level = LogLevel::parse(
            parts
                .next()
                .ok_or_else(|| Error::protocol("log topic missing level segment"))?,
        )?;
        let logger = parts
            .next()
            .ok_or_else(|| Error::protocol("log topic missing logger segment"))?
            .to_string();
        let header = MessageHeader::decode(&frames[1], Protocol::Cmdp)?;
        let message = String::from_utf8(frames[2].clone())
            .map_err(|_| Error::protocol("log message is not valid utf-8"))?;
        Ok(LogRecord {
            sender: header.sender,
            level,
            logger,
            message,
            timestamp_ns: header.timestamp_ns,
            meta: header.meta,
        })
    }
}

/// How a subscriber should fold successive values of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetricsType {
    LastValue = 0x01,
    Accumulate = 0x02,
    Average = 0x03,
    Rate = 0x04,
}

impl MetricsType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0x01 => Ok(MetricsType::LastValue),
            0x02 => Ok(MetricsType::Accumulate),
            0x03 => Ok(MetricsType::Average),
            0x04 => Ok(MetricsType::Rate),
            other => Err(Error::protocol(format!(
                "invalid metric handling code {:#04x}",
                other
            ))),
        }
    }
}

/// A metric sample in transit.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    pub handling: MetricsType,
    pub value: Value,
    pub sender: String,
    pub timestamp_ns: u64,
    pub meta: MetaMap,
}

impl Metric {
    fn topic(&self) -> String {
        format!("STATS/{}", self.name).to_uppercase()
    }

    pub fn encode(&self) -> Result<Vec<Vec<u8>>> {
        let mut header = MessageHeader::new(Protocol::Cmdp, &self.sender);
        header.timestamp_ns = self.timestamp_ns;
        header.meta = self.meta.clone();
        let packed = pack::pack_value(&Value::Array(vec![
            self.value.clone(),
            Value::from(self.handling as u8),
            Value::from(self.unit.as_str()),
        ]))?;
        Ok(vec![self.topic().into_bytes(), header.encode()?, packed])
    }

    fn decode(topic: &str, frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() != 3 {
            return Err(Error::protocol(format!(
                "CMDP metric message has {} frames instead of 3",
                frames.len()
            )));
        }
        let name = topic
            .strip_prefix("STATS/")
            .ok_or_else(|| Error::protocol("metric topic missing STATS/ prefix"))?
            .to_string();
        let header = MessageHeader::decode(&frames[1], Protocol::Cmdp)?;
        let packed = pack::unpack_value(&frames[2])?;
        let list = match packed {
            Value::Array(items) if items.len() == 3 => items,
            other => {
                return Err(Error::protocol(format!(
                    "metric payload must be a 3-element array, got {}",
                    other
                )))
            }
        };
        let mut items = list.into_iter();
        let value = items.next().expect("length checked");
        let handling = items
            .next()
            .expect("length checked")
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| Error::protocol("metric handling code is not an integer"))?;
        let unit = match items.next().expect("length checked") {
            Value::String(s) => s
                .into_str()
                .ok_or_else(|| Error::protocol("metric unit is not valid utf-8"))?,
            other => return Err(Error::protocol(format!("metric unit must be a string, got {}", other))),
        };
        Ok(Metric {
            name,
            unit,
            handling: MetricsType::from_u8(handling)?,
            value,
            sender: header.sender,
            timestamp_ns: header.timestamp_ns,
            meta: header.meta,
        })
    }
}

/// A decoded CMDP message, discriminated by topic prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum CmdpMessage {
    Log(LogRecord),
    Metric(Metric),
}

impl CmdpMessage {
    pub fn decode(frames: &[Vec<u8>]) -> Result<Self> {
        let topic = frames
            .first()
            .ok_or_else(|| Error::protocol("empty CMDP message"))?;
        let topic = std::str::from_utf8(topic)
            .map_err(|_| Error::protocol("CMDP topic is not valid utf-8"))?;
        if topic.starts_with("LOG/") {
            Ok(CmdpMessage::Log(LogRecord::decode(topic, frames)?))
        } else if topic.starts_with("STATS/") {
            Ok(CmdpMessage::Metric(Metric::decode(topic, frames)?))
        } else {
            Err(Error::protocol(format!(
                "cannot decode CMDP topic '{}'",
                topic
            )))
        }
    }
}
