// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CDTP data-run framing.
//!
//! One message per frame group: a header frame carrying the shared envelope
//! plus the message kind and sequence number, then zero or more raw payload
//! frames whose boundaries the transport preserves end-to-end.
//!
//! ```text
//! frame 0: tag | sender | timestamp | kind (u8) | seq (u64) | meta (map)
//! frame 1..n: payload bytes, boundaries preserved
//! ```
//!
//! Per connection and run the kinds form the ordered sequence
//! `BOR, DAT*, EOR` with contiguous sequence numbers starting at 0; the
//! sequence counter itself is owned by [`crate::data::DataSender`].

use super::header::MessageHeader;
use super::pack::{self, MetaMap};
use super::Protocol;
use crate::error::{Error, Result};

/// Kind of a CDTP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataKind {
    /// In-run data.
    Dat = 0x00,
    /// Begin-of-run; sequence number 0, meta snapshots the run configuration.
    Bor = 0x01,
    /// End-of-run; sequence number last+1, meta carries run statistics.
    Eor = 0x02,
}

impl DataKind {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0x00 => Ok(DataKind::Dat),
            0x01 => Ok(DataKind::Bor),
            0x02 => Ok(DataKind::Eor),
            other => Err(Error::protocol(format!(
                "invalid CDTP message kind {:#04x}",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DataKind::Dat => "DAT",
            DataKind::Bor => "BOR",
            DataKind::Eor => "EOR",
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A decoded CDTP message.
#[derive(Debug, Clone, PartialEq)]
pub struct CdtpMessage {
    pub sender: String,
    pub timestamp_ns: u64,
    pub kind: DataKind,
    pub seq: u64,
    pub meta: MetaMap,
    /// Payload frames with boundaries preserved; empty for payload-less
    /// BOR/EOR.
    pub payload: Vec<Vec<u8>>,
}

impl CdtpMessage {
    /// Assemble the wire frames for one message.
    pub fn encode_frames(
        sender: &str,
        kind: DataKind,
        seq: u64,
        meta: Option<&MetaMap>,
        payload: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>> {
        let header = MessageHeader::new(Protocol::Cdtp, sender);
        let mut frame = Vec::with_capacity(64);
        header.encode_prefix(&mut frame)?;
        pack::write_uint(&mut frame, u64::from(kind as u8))?;
        pack::write_uint(&mut frame, seq)?;
        pack::write_meta(&mut frame, meta)?;
        let mut frames = Vec::with_capacity(1 + payload.len());
        frames.push(frame);
        frames.extend(payload.iter().cloned());
        Ok(frames)
    }

    pub fn decode(frames: &[Vec<u8>]) -> Result<Self> {
        let header_frame = frames
            .first()
            .ok_or_else(|| Error::protocol("empty CDTP message"))?;
        let mut cursor = header_frame.as_slice();
        let header = MessageHeader::decode_prefix(&mut cursor, Protocol::Cdtp)?;
        let kind = pack::read_uint(&mut cursor)?;
        let kind = DataKind::from_u8(
            u8::try_from(kind)
                .map_err(|_| Error::protocol(format!("message kind {} out of range", kind)))?,
        )?;
        let seq = pack::read_uint(&mut cursor)?;
        let meta = pack::read_meta(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(Error::protocol("trailing bytes after CDTP header"));
        }
        Ok(CdtpMessage {
            sender: header.sender,
            timestamp_ns: header.timestamp_ns,
            kind,
            seq,
            meta,
            payload: frames[1..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Value;

    #[test]
    fn test_bor_round_trip() {
        let mut meta = MetaMap::new();
        meta.insert("run_id".into(), Value::from("r42"));
        let frames =
            CdtpMessage::encode_frames("producer", DataKind::Bor, 0, Some(&meta), &[]).unwrap();
        let msg = CdtpMessage::decode(&frames).unwrap();
        assert_eq!(msg.kind, DataKind::Bor);
        assert_eq!(msg.seq, 0);
        assert_eq!(msg.meta.get("run_id"), Some(&Value::from("r42")));
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn test_dat_preserves_frame_boundaries() {
        let payload = vec![b"\x01".to_vec(), b"\x02\x03".to_vec(), b"".to_vec()];
        let frames =
            CdtpMessage::encode_frames("producer", DataKind::Dat, 7, None, &payload).unwrap();
        assert_eq!(frames.len(), 4);
        let msg = CdtpMessage::decode(&frames).unwrap();
        assert_eq!(msg.kind, DataKind::Dat);
        assert_eq!(msg.seq, 7);
        assert_eq!(msg.payload, payload);
    }

    #[test]
    fn test_invalid_kind_rejected() {
        let frames =
            CdtpMessage::encode_frames("producer", DataKind::Eor, 4, None, &[]).unwrap();
        let msg = CdtpMessage::decode(&frames).unwrap();
        assert_eq!(msg.kind, DataKind::Eor);

        // corrupt the kind byte inside the header frame: re-encode manually
        let header = MessageHeader::new(Protocol::Cdtp, "producer");
        let mut frame = Vec::new();
        header.encode_prefix(&mut frame).unwrap();
        pack::write_uint(&mut frame, 9).unwrap();
        pack::write_uint(&mut frame, 0).unwrap();
        pack::write_meta(&mut frame, None).unwrap();
        assert!(CdtpMessage::decode(&[frame]).is_err());
    }
}
