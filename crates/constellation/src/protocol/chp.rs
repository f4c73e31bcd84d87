// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHP heartbeat messages.
//!
//! `[header, body]` with the body carrying the sender's current lifecycle
//! state code and the promised interval until the next heartbeat in
//! milliseconds. Receivers derive liveness deadlines from the promise; the
//! miss rule itself lives in [`crate::heartbeat`].

use super::header::MessageHeader;
use super::pack;
use super::Protocol;
use crate::error::{Error, Result};

/// Decoded heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub sender: String,
    /// On-wire lifecycle state code (see [`crate::fsm::State`]).
    pub state_code: u8,
    /// Promise of when the next heartbeat will arrive.
    pub interval_ms: u64,
    pub timestamp_ns: u64,
}

impl Heartbeat {
    pub fn encode(sender: &str, state_code: u8, interval_ms: u64) -> Result<Vec<Vec<u8>>> {
        let header = MessageHeader::new(Protocol::Chp, sender);
        let mut body = Vec::with_capacity(12);
        pack::write_uint(&mut body, u64::from(state_code))?;
        pack::write_uint(&mut body, interval_ms)?;
        Ok(vec![header.encode()?, body])
    }

    pub fn decode(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() != 2 {
            return Err(Error::protocol(format!(
                "CHP message has {} frames instead of 2",
                frames.len()
            )));
        }
        let header = MessageHeader::decode(&frames[0], Protocol::Chp)?;
        let mut cursor = frames[1].as_slice();
        let state = pack::read_uint(&mut cursor)?;
        let interval_ms = pack::read_uint(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(Error::protocol("trailing bytes after heartbeat body"));
        }
        Ok(Heartbeat {
            sender: header.sender,
            state_code: u8::try_from(state)
                .map_err(|_| Error::protocol(format!("state code {} out of range", state)))?,
            interval_ms,
            timestamp_ns: header.timestamp_ns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let frames = Heartbeat::encode("sat_a", 0x40, 1100).unwrap();
        let hb = Heartbeat::decode(&frames).unwrap();
        assert_eq!(hb.sender, "sat_a");
        assert_eq!(hb.state_code, 0x40);
        assert_eq!(hb.interval_ms, 1100);
    }

    #[test]
    fn test_oversized_state_rejected() {
        let header = MessageHeader::new(Protocol::Chp, "sat_a");
        let mut body = Vec::new();
        pack::write_uint(&mut body, 0x1_00).unwrap();
        pack::write_uint(&mut body, 1100).unwrap();
        let frames = vec![header.encode().unwrap(), body];
        assert!(Heartbeat::decode(&frames).is_err());
    }
}
