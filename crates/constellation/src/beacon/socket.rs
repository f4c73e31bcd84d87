// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The CHIRP UDP socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::chirp::{
    name_uuid, ChirpMessage, ChirpMessageType, ServiceKind, CHIRP_LEN, CHIRP_PORT,
};

pub struct BeaconSocket {
    socket: UdpSocket,
    host_uuid: Uuid,
    group_uuid: Uuid,
    filter_group: bool,
    broadcasts: Vec<Ipv4Addr>,
}

impl BeaconSocket {
    /// Open the beacon socket for the given identity on the selected
    /// interface (`*` means all).
    pub fn open(name: &str, group: &str, interface: &str) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        // Re-use the fixed beacon port; several satellites share one host.
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(target_os = "linux")))]
        socket.set_reuse_port(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, CHIRP_PORT));
        socket.bind(&bind_addr.into()).map_err(|e| Error::BindFailed {
            addr: bind_addr.to_string(),
            reason: e.to_string(),
        })?;

        Ok(BeaconSocket {
            socket: socket.into(),
            host_uuid: name_uuid(name),
            group_uuid: name_uuid(group),
            filter_group: true,
            broadcasts: super::broadcast_addresses(interface),
        })
    }

    pub fn host_uuid(&self) -> Uuid {
        self.host_uuid
    }

    pub fn group_uuid(&self) -> Uuid {
        self.group_uuid
    }

    /// Whether incoming broadcasts are filtered on group (default on).
    pub fn set_group_filter(&mut self, on: bool) {
        self.filter_group = on;
    }

    /// Send one datagram for the given service to every broadcast address.
    /// Discovery is best-effort: an address that refuses the send is logged
    /// and skipped.
    pub fn broadcast(&self, kind: ServiceKind, msgtype: ChirpMessageType, port: u16) {
        let msg = ChirpMessage {
            msgtype,
            group_uuid: self.group_uuid,
            host_uuid: self.host_uuid,
            kind,
            port,
        };
        let buf = msg.encode();
        for bcast in &self.broadcasts {
            if let Err(e) = self
                .socket
                .send_to(&buf, SocketAddr::from((*bcast, CHIRP_PORT)))
            {
                log::debug!("[CHIRP] send to {} failed (non-fatal): {}", bcast, e);
            }
        }
    }

    /// Poll for one datagram. `Ok(None)` when nothing is waiting or the
    /// packet was self-sent / foreign-group; `Err(Protocol)` for malformed
    /// packets (the caller logs and continues).
    pub fn listen(&self) -> Result<Option<(ChirpMessage, IpAddr)>> {
        let mut buf = [0u8; 1024];
        let (len, from) = match self.socket.recv_from(&mut buf) {
            Ok(ok) => ok,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len != CHIRP_LEN {
            return Err(Error::protocol(format!(
                "datagram from {} is {} bytes instead of {}",
                from.ip(),
                len,
                CHIRP_LEN
            )));
        }
        let msg = ChirpMessage::decode(&buf[..len])?;
        if msg.host_uuid == self.host_uuid {
            return Ok(None);
        }
        if self.filter_group && msg.group_uuid != self.group_uuid {
            return Ok(None);
        }
        Ok(Some((msg, from.ip())))
    }
}
