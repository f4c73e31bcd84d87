// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CSCP command request/reply messages.
//!
//! A request is `[header, body]` with the body carrying the verb string and
//! an optional payload value. A reply is `[header, body]` with the body
//! carrying the result code, the message string and an optional payload
//! value. Verbs are case-folded to lowercase on decode so controllers may
//! send any casing.

use super::header::MessageHeader;
use super::pack::{self, MetaMap, Value};
use super::Protocol;
use crate::error::{Error, Result};

/// Result code of a CSCP reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyVerb {
    Success = 0x01,
    /// Verb known but not admissible (state gate or guard predicate).
    Invalid = 0x02,
    NotImplemented = 0x03,
    /// Handler received a missing or wrongly typed argument.
    Incomplete = 0x04,
    /// Verb not known at all.
    Unknown = 0x05,
    /// Handler raised; the message carries the printable form.
    Error = 0x06,
}

impl ReplyVerb {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0x01 => Ok(ReplyVerb::Success),
            0x02 => Ok(ReplyVerb::Invalid),
            0x03 => Ok(ReplyVerb::NotImplemented),
            0x04 => Ok(ReplyVerb::Incomplete),
            0x05 => Ok(ReplyVerb::Unknown),
            0x06 => Ok(ReplyVerb::Error),
            other => Err(Error::protocol(format!("invalid reply verb {:#04x}", other))),
        }
    }
}

/// Decoded command request.
#[derive(Debug, Clone)]
pub struct CscpRequest {
    pub header: MessageHeader,
    /// Lowercased verb string.
    pub verb: String,
    pub payload: Option<Value>,
}

impl CscpRequest {
    pub fn new(sender: &str, verb: &str, payload: Option<Value>) -> Self {
        CscpRequest {
            header: MessageHeader::new(Protocol::Cscp, sender),
            verb: verb.to_lowercase(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<Vec<u8>>> {
        let mut body = Vec::new();
        pack::write_str(&mut body, &self.verb)?;
        if let Some(payload) = &self.payload {
            pack::write_value(&mut body, payload)?;
        }
        Ok(vec![self.header.encode()?, body])
    }

    pub fn decode(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() != 2 {
            return Err(Error::protocol(format!(
                "CSCP request has {} frames instead of 2",
                frames.len()
            )));
        }
        let header = MessageHeader::decode(&frames[0], Protocol::Cscp)?;
        let mut cursor = frames[1].as_slice();
        let verb = pack::read_str(&mut cursor)?.to_lowercase();
        let payload = if cursor.is_empty() {
            None
        } else {
            Some(pack::read_value(&mut cursor)?)
        };
        if !cursor.is_empty() {
            return Err(Error::protocol("trailing bytes after request payload"));
        }
        Ok(CscpRequest {
            header,
            verb,
            payload,
        })
    }
}

/// Decoded command reply.
#[derive(Debug, Clone)]
pub struct CscpReply {
    pub header: MessageHeader,
    pub verb: ReplyVerb,
    pub message: String,
    pub payload: Option<Value>,
}

impl CscpReply {
    pub fn new(sender: &str, verb: ReplyVerb, message: impl Into<String>) -> Self {
        CscpReply {
            header: MessageHeader::new(Protocol::Cscp, sender),
            verb,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_meta(mut self, meta: MetaMap) -> Self {
        self.header.meta = meta;
        self
    }

    pub fn encode(&self) -> Result<Vec<Vec<u8>>> {
        let mut body = Vec::new();
        pack::write_uint(&mut body, self.verb as u64)?;
        pack::write_str(&mut body, &self.message)?;
        if let Some(payload) = &self.payload {
            pack::write_value(&mut body, payload)?;
        }
        Ok(vec![self.header.encode()?, body])
    }

    pub fn decode(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() != 2 {
            return Err(Error::protocol(format!(
                "CSCP reply has {} frames instead of 2",
                frames.len()
            )));
        }
        let header = MessageHeader::decode(&frames[0], Protocol::Cscp)?;
        let mut cursor = frames[1].as_slice();
        let code = pack::read_uint(&mut cursor)?;
        let verb = ReplyVerb::from_u8(u8::try_from(code).map_err(|_| {
            Error::protocol(format!("reply verb {} out of range", code))
        })?)?;
        let message = pack::read_str(&mut cursor)?;
        let payload = if cursor.is_empty() {
            None
        } else {
            Some(pack::read_value(&mut cursor)?)
        };
        if !cursor.is_empty() {
            return Err(Error::protocol("trailing bytes after reply payload"));
        }
        Ok(CscpReply {
            header,
            verb,
            message,
            payload,
        })
    }
}
