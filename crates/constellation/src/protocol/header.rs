// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Common message header shared by CSCP, CHP, CMDP and CDTP.
//!
//! Header frame layout (concatenated top-level msgpack values):
//!
//! ```text
//! +-------------------+--------------+---------------------+------------+
//! | protocol tag (str)| sender (str) | timestamp (ext -1)  | meta (map) |
//! +-------------------+--------------+---------------------+------------+
//! ```
//!
//! CDTP inserts two extra values between the timestamp and the meta map:
//! message kind (`u8`) and sequence number (`u64`). Those live in
//! [`super::cdtp`]; this type covers the shared triple + meta.

use super::pack::{self, MetaMap};
use super::Protocol;
use crate::error::{Error, Result};

/// Decoded envelope header.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub protocol: Protocol,
    pub sender: String,
    /// UTC wallclock, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    pub meta: MetaMap,
}

impl MessageHeader {
    /// New header stamped with the current wallclock.
    pub fn new(protocol: Protocol, sender: impl Into<String>) -> Self {
        MessageHeader {
            protocol,
            sender: sender.into(),
            timestamp_ns: pack::now_nanos(),
            meta: MetaMap::new(),
        }
    }

    pub fn with_meta(mut self, meta: MetaMap) -> Self {
        self.meta = meta;
        self
    }

    /// Encode into a header frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        self.encode_prefix(&mut buf)?;
        pack::write_meta(&mut buf, Some(&self.meta))?;
        Ok(buf)
    }

    /// Encode only the tag/sender/timestamp triple; CDTP appends its own
    /// fields before the meta map.
    pub(crate) fn encode_prefix(&self, buf: &mut Vec<u8>) -> Result<()> {
        pack::write_str(buf, self.protocol.tag())?;
        pack::write_str(buf, &self.sender)?;
        pack::write_timestamp(buf, self.timestamp_ns)
    }

    /// Decode a header frame, requiring the given protocol tag.
    pub fn decode(frame: &[u8], expected: Protocol) -> Result<Self> {
        let mut cursor = frame;
        let header = Self::decode_prefix(&mut cursor, expected)?;
        let meta = pack::read_meta(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(Error::protocol(format!(
                "{} trailing bytes after header",
                cursor.len()
            )));
        }
        Ok(MessageHeader { meta, ..header })
    }

    /// Decode the tag/sender/timestamp triple, leaving the cursor before any
    /// protocol-specific fields and the meta map.
    pub(crate) fn decode_prefix(cursor: &mut &[u8], expected: Protocol) -> Result<Self> {
        let tag = pack::read_str(cursor)?;
        let protocol = Protocol::from_tag(&tag)?;
        if protocol != expected {
            return Err(Error::protocol(format!(
                "expected {:?} message, got {:?}",
                expected, protocol
            )));
        }
        let sender = pack::read_str(cursor)?;
        let timestamp_ns = pack::read_timestamp(cursor)?;
        Ok(MessageHeader {
            protocol,
            sender,
            timestamp_ns,
            meta: MetaMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Value;

    #[test]
    fn test_header_round_trip() {
        let mut meta = MetaMap::new();
        meta.insert("level".into(), Value::from("INFO"));
        let header = MessageHeader {
            protocol: Protocol::Cmdp,
            sender: "sat_a".into(),
            timestamp_ns: 1_700_000_000_000_000_042,
            meta,
        };
        let frame = header.encode().unwrap();
        let decoded = MessageHeader::decode(&frame, Protocol::Cmdp).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_wrong_protocol_rejected() {
        let header = MessageHeader::new(Protocol::Chp, "sat_a");
        let frame = header.encode().unwrap();
        assert!(MessageHeader::decode(&frame, Protocol::Cscp).is_err());
    }

    #[test]
    fn test_garbage_frame_rejected() {
        assert!(MessageHeader::decode(b"\xff\xff\xff", Protocol::Cscp).is_err());
        assert!(MessageHeader::decode(b"", Protocol::Cscp).is_err());
    }
}
