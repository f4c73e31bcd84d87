// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bound request/reply endpoint (the satellite side of CSCP).
//!
//! Serves one controller connection at a time: while a client is connected,
//! further connects queue in the accept backlog. A dropped client resets
//! the decoder so a half-read request cannot leak into the next session.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use crate::error::{Error, Result};

use super::framing::MessageDecoder;
use super::{bind_tcp, framing, Message};

pub struct ReplySocket {
    listener: TcpListener,
    port: u16,
    client: Option<TcpStream>,
    decoder: MessageDecoder,
}

impl ReplySocket {
    pub fn bind(interface: &str, port: u16) -> Result<Self> {
        let (listener, port) = bind_tcp(interface, port)?;
        listener.set_nonblocking(true)?;
        Ok(ReplySocket {
            listener,
            port,
            client: None,
            decoder: MessageDecoder::default(),
        })
    }

    /// Port actually bound (relevant when 0 requested an ephemeral bind).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait up to `timeout` for one complete request from the current
    /// client. Accepts a new client first if none is connected.
    pub fn poll_request(&mut self, timeout: Duration) -> Result<Option<Message>> {
        if self.client.is_none() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    log::debug!("[CSCP] controller connected from {}", addr);
                    stream.set_nodelay(true)?;
                    self.client = Some(stream);
                    self.decoder.reset();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // nobody waiting; don't spin the caller's loop
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let stream = self.client.as_mut().expect("client connected above");
        stream.set_read_timeout(Some(timeout))?;
        match self.decoder.decode_from(stream) {
            Ok(req) => Ok(req),
            Err(e) => {
                log::debug!("[CSCP] controller connection dropped: {}", e);
                self.client = None;
                self.decoder.reset();
                Ok(None)
            }
        }
    }

    /// Send the reply to the current client.
    pub fn send_reply(&mut self, frames: &[Vec<u8>]) -> Result<()> {
        let stream = self.client.as_mut().ok_or_else(|| Error::SendFailed {
            reason: "no client connected".into(),
        })?;
        let borrowed: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
        if let Err(e) = framing::write_message(stream, &borrowed) {
            self.client = None;
            self.decoder.reset();
            return Err(Error::SendFailed {
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_request_reply_over_loopback() {
        let mut rep = ReplySocket::bind("127.0.0.1", 0).unwrap();
        let port = rep.port();
        assert_ne!(port, 0);

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .write_all(&framing::encode_message(&[b"ping"]))
            .unwrap();

        let mut req = None;
        for _ in 0..50 {
            if let Some(msg) = rep.poll_request(Duration::from_millis(20)).unwrap() {
                req = Some(msg);
                break;
            }
        }
        assert_eq!(req.unwrap(), vec![b"ping".to_vec()]);

        rep.send_reply(&[b"pong".to_vec()]).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut decoder = MessageDecoder::default();
        let reply = loop {
            if let Some(msg) = decoder.decode_from(&mut client).unwrap() {
                break msg;
            }
        };
        assert_eq!(reply, vec![b"pong".to_vec()]);
    }

    #[test]
    fn test_client_disconnect_recovers() {
        let mut rep = ReplySocket::bind("127.0.0.1", 0).unwrap();
        let port = rep.port();

        {
            let _short_lived = TcpStream::connect(("127.0.0.1", port)).unwrap();
            // accept the connection
            let _ = rep.poll_request(Duration::from_millis(20));
        }
        // disconnected client is dropped without error
        for _ in 0..50 {
            let polled = rep.poll_request(Duration::from_millis(10)).unwrap();
            assert!(polled.is_none());
            if rep.client.is_none() {
                break;
            }
        }

        // and a new client is served
        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client
            .write_all(&framing::encode_message(&[b"again"]))
            .unwrap();
        let mut req = None;
        for _ in 0..50 {
            if let Some(msg) = rep.poll_request(Duration::from_millis(20)).unwrap() {
                req = Some(msg);
                break;
            }
        }
        assert_eq!(req.unwrap(), vec![b"again".to_vec()]);
    }
}
