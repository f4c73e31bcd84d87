// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHIRP beacon datagram codec.
//!
//! Fixed 42-byte wire layout, bit-exact:
//!
//! ```text
//! +-----------+------+-------------+-------------+------+-----------+
//! | "CHIRP\x01"| type | group uuid  | host uuid   | kind | port (BE) |
//! |   6 B     | 1 B  |    16 B     |    16 B     | 1 B  |    2 B    |
//! +-----------+------+-------------+-------------+------+-----------+
//! ```
//!
//! Host and group identities are UUIDs derived deterministically by MD5
//! hashing the canonical name, so identity is stable across restarts and
//! pure in the name.

use md5::{Digest, Md5};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Well-known CHIRP beacon port.
pub const CHIRP_PORT: u16 = 7123;

/// Wire magic including the protocol version byte.
pub const CHIRP_MAGIC: &[u8; 6] = b"CHIRP\x01";

/// Exact datagram length.
pub const CHIRP_LEN: usize = 42;

/// Derive the stable UUID for a satellite or group name.
pub fn name_uuid(name: &str) -> Uuid {
    let digest = Md5::digest(name.as_bytes());
    Uuid::from_bytes(digest.into())
}

/// Type of a CHIRP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChirpMessageType {
    /// Hosts receiving a REQUEST reply with one OFFER per published service.
    Request = 0x01,
    /// A service is available at the advertised port.
    Offer = 0x02,
    /// A previously offered service is going away.
    Depart = 0x03,
}

impl ChirpMessageType {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0x01 => Ok(ChirpMessageType::Request),
            0x02 => Ok(ChirpMessageType::Offer),
            0x03 => Ok(ChirpMessageType::Depart),
            other => Err(Error::protocol(format!(
                "invalid CHIRP message type {:#04x}",
                other
            ))),
        }
    }
}

/// One of the four service endpoints a satellite can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ServiceKind {
    /// CSCP command endpoint.
    Control = 0x01,
    /// CHP heartbeat publisher.
    Heartbeat = 0x02,
    /// CMDP log/metric publisher.
    Monitoring = 0x03,
    /// CDTP data producer.
    Data = 0x04,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Control,
        ServiceKind::Heartbeat,
        ServiceKind::Monitoring,
        ServiceKind::Data,
    ];

    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0x01 => Ok(ServiceKind::Control),
            0x02 => Ok(ServiceKind::Heartbeat),
            0x03 => Ok(ServiceKind::Monitoring),
            0x04 => Ok(ServiceKind::Data),
            other => Err(Error::protocol(format!(
                "invalid CHIRP service kind {:#04x}",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ServiceKind::Control => "CONTROL",
            ServiceKind::Heartbeat => "HEARTBEAT",
            ServiceKind::Monitoring => "MONITORING",
            ServiceKind::Data => "DATA",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Decoded CHIRP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChirpMessage {
    pub msgtype: ChirpMessageType,
    pub group_uuid: Uuid,
    pub host_uuid: Uuid,
    pub kind: ServiceKind,
    pub port: u16,
}

impl ChirpMessage {
    /// Serialise to the fixed 42-byte wire form.
    pub fn encode(&self) -> [u8; CHIRP_LEN] {
        let mut buf = [0u8; CHIRP_LEN];
        buf[0..6].copy_from_slice(CHIRP_MAGIC);
        buf[6] = self.msgtype as u8;
        buf[7..23].copy_from_slice(self.group_uuid.as_bytes());
        buf[23..39].copy_from_slice(self.host_uuid.as_bytes());
        buf[39] = self.kind as u8;
        buf[40..42].copy_from_slice(&self.port.to_be_bytes());
        buf
    }

    /// Decode and validate a received datagram.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != CHIRP_LEN {
            return Err(Error::protocol(format!(
                "CHIRP datagram is {} bytes instead of {}",
                buf.len(),
                CHIRP_LEN
            )));
        }
        if &buf[0..6] != CHIRP_MAGIC {
            return Err(Error::protocol(format!(
                "malformed CHIRP magic {:?}",
                &buf[0..6]
            )));
        }
        Ok(ChirpMessage {
            msgtype: ChirpMessageType::from_u8(buf[6])?,
            group_uuid: Uuid::from_slice(&buf[7..23]).expect("slice length is 16"),
            host_uuid: Uuid::from_slice(&buf[23..39]).expect("slice length is 16"),
            kind: ServiceKind::from_u8(buf[39])?,
            port: u16::from_be_bytes([buf[40], buf[41]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_is_pure_function() {
        assert_eq!(name_uuid("sat_a"), name_uuid("sat_a"));
        assert_ne!(name_uuid("sat_a"), name_uuid("sat_b"));
    }

    #[test]
    fn test_encode_is_bit_exact() {
        let msg = ChirpMessage {
            msgtype: ChirpMessageType::Offer,
            group_uuid: Uuid::from_bytes([0u8; 16]),
            host_uuid: Uuid::from_bytes([
                0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
            ]),
            kind: ServiceKind::Control,
            port: 23999,
        };
        let buf = msg.encode();
        assert_eq!(buf.len(), 42);
        assert_eq!(&buf[0..6], b"CHIRP\x01");
        assert_eq!(buf[6], 0x02);
        assert_eq!(&buf[7..23], &[0u8; 16]);
        assert_eq!(&buf[23..38], &[0u8; 15]);
        assert_eq!(buf[38], 0x01);
        assert_eq!(buf[39], 0x01);
        assert_eq!(&buf[40..42], &[0x5D, 0xBF]);
    }

    #[test]
    fn test_round_trip() {
        let msg = ChirpMessage {
            msgtype: ChirpMessageType::Depart,
            group_uuid: name_uuid("g1"),
            host_uuid: name_uuid("sat_a"),
            kind: ServiceKind::Data,
            port: 0,
        };
        assert_eq!(ChirpMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_bad_length_rejected() {
        let msg = ChirpMessage {
            msgtype: ChirpMessageType::Request,
            group_uuid: name_uuid("g"),
            host_uuid: name_uuid("h"),
            kind: ServiceKind::Heartbeat,
            port: 1,
        };
        let buf = msg.encode();
        assert!(ChirpMessage::decode(&buf[..41]).is_err());
        let mut long = buf.to_vec();
        long.push(0);
        assert!(ChirpMessage::decode(&long).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = ChirpMessage {
            msgtype: ChirpMessageType::Request,
            group_uuid: name_uuid("g"),
            host_uuid: name_uuid("h"),
            kind: ServiceKind::Heartbeat,
            port: 1,
        }
        .encode();
        buf[5] = 0x02;
        assert!(ChirpMessage::decode(&buf).is_err());
    }

    #[test]
    fn test_bad_type_and_kind_rejected() {
        let mut buf = ChirpMessage {
            msgtype: ChirpMessageType::Offer,
            group_uuid: name_uuid("g"),
            host_uuid: name_uuid("h"),
            kind: ServiceKind::Control,
            port: 1,
        }
        .encode();
        buf[6] = 0x07;
        assert!(ChirpMessage::decode(&buf).is_err());
        buf[6] = 0x02;
        buf[39] = 0x00;
        assert!(ChirpMessage::decode(&buf).is_err());
    }
}
