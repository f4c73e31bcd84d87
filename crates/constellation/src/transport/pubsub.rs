// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish/subscribe fan-out for heartbeats and monitoring.
//!
//! The publisher binds and fans every message out to all connected
//! subscribers; a stalled or dead subscriber connection is dropped so it can
//! never block the publisher. Topic filtering happens on the subscriber
//! side: the first frame of a published message is matched against the
//! registered byte prefixes, and non-matching messages are discarded after
//! decode. A subscriber with no filters receives nothing.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;

use super::framing::{self, MessageDecoder};
use super::{bind_tcp, Message};

/// Write deadline per subscriber; beyond this the connection counts as
/// stalled and is dropped.
const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_millis(250);

pub struct PubSocket {
    listener: TcpListener,
    port: u16,
    subscribers: Mutex<Vec<TcpStream>>,
}

impl PubSocket {
    pub fn bind(interface: &str, port: u16) -> Result<Self> {
        let (listener, port) = bind_tcp(interface, port)?;
        listener.set_nonblocking(true)?;
        Ok(PubSocket {
            listener,
            port,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn accept_pending(&self, subscribers: &mut Vec<TcpStream>) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    log::debug!("[PUB] subscriber connected from {}", addr);
                    let _ = stream.set_nodelay(true);
                    let _ = stream.set_write_timeout(Some(SUBSCRIBER_WRITE_TIMEOUT));
                    subscribers.push(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[PUB] accept failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Fan one message out to every live subscriber.
    pub fn publish(&self, frames: &[Vec<u8>]) -> Result<()> {
        let encoded = {
            let borrowed: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
            framing::encode_message(&borrowed)
        };
        let mut subscribers = self.subscribers.lock();
        self.accept_pending(&mut subscribers);
        subscribers.retain_mut(|stream| match io::Write::write_all(stream, &encoded) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("[PUB] dropping subscriber: {}", e);
                false
            }
        });
        Ok(())
    }
}

pub struct SubSocket {
    stream: TcpStream,
    decoder: MessageDecoder,
    filters: Vec<Vec<u8>>,
}

impl SubSocket {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2))?;
        stream.set_nodelay(true)?;
        Ok(SubSocket {
            stream,
            decoder: MessageDecoder::default(),
            filters: Vec::new(),
        })
    }

    /// Register a topic byte-prefix; the empty prefix matches everything.
    pub fn subscribe(&mut self, prefix: impl Into<Vec<u8>>) {
        self.filters.push(prefix.into());
    }

    fn matches(&self, msg: &Message) -> bool {
        let topic = msg.first().map(Vec::as_slice).unwrap_or(b"");
        self.filters.iter().any(|f| topic.starts_with(f))
    }

    /// Wait up to `timeout` for the next message passing the filters.
    /// `Ok(None)` on timeout or when a message was filtered out.
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<Message>> {
        self.stream.set_read_timeout(Some(timeout))?;
        match self.decoder.decode_from(&mut self.stream)? {
            Some(msg) if self.matches(&msg) => Ok(Some(msg)),
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }
}
