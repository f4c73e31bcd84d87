// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connecting request/reply endpoint (the controller side of CSCP).

use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

use super::framing::{self, MessageDecoder};
use super::Message;

/// Default per-request reply deadline; satellites answer quickly because
/// long-running transitions are queued, not executed inline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

pub struct RequestSocket {
    stream: TcpStream,
    decoder: MessageDecoder,
    timeout: Duration,
}

impl RequestSocket {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn connect_with_timeout(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        Ok(RequestSocket {
            stream,
            decoder: MessageDecoder::default(),
            timeout,
        })
    }

    pub fn peer(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Send one request and wait for its reply.
    pub fn request(&mut self, frames: &[Vec<u8>]) -> Result<Message> {
        let borrowed: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
        framing::write_message(&mut self.stream, &borrowed).map_err(|e| Error::SendFailed {
            reason: e.to_string(),
        })?;

        let deadline = Instant::now() + self.timeout;
        self.stream
            .set_read_timeout(Some(Duration::from_millis(100)))?;
        loop {
            match self.decoder.decode_from(&mut self.stream)? {
                Some(reply) => return Ok(reply),
                None => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout {
                            what: "command reply".into(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReplySocket;

    #[test]
    fn test_round_trip_against_reply_socket() {
        let mut rep = ReplySocket::bind("127.0.0.1", 0).unwrap();
        let port = rep.port();

        let server = std::thread::spawn(move || {
            loop {
                if let Some(req) = rep.poll_request(Duration::from_millis(20)).unwrap() {
                    assert_eq!(req, vec![b"marco".to_vec()]);
                    rep.send_reply(&[b"polo".to_vec()]).unwrap();
                    break;
                }
            }
        });

        let mut req = RequestSocket::connect(SocketAddr::from(([127, 0, 0, 1], port))).unwrap();
        let reply = req.request(&[b"marco".to_vec()]).unwrap();
        assert_eq!(reply, vec![b"polo".to_vec()]);
        server.join().unwrap();
    }

    #[test]
    fn test_reply_timeout() {
        let mut rep = ReplySocket::bind("127.0.0.1", 0).unwrap();
        let port = rep.port();

        // accept but never answer
        let server = std::thread::spawn(move || {
            for _ in 0..100 {
                let _ = rep.poll_request(Duration::from_millis(20));
            }
        });

        let mut req = RequestSocket::connect_with_timeout(
            SocketAddr::from(([127, 0, 0, 1], port)),
            Duration::from_millis(300),
        )
        .unwrap();
        match req.request(&[b"anyone?".to_vec()]) {
            Err(Error::Timeout { .. }) => {}
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
        server.join().unwrap();
    }
}
