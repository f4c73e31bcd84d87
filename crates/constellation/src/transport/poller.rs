// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Readiness multiplexing over many framed connections.
//!
//! Consumers (data receivers, metric listeners, heartbeat checkers) watch a
//! changing set of peer connections with a single poll timeout. Connections
//! are non-blocking mio streams; each carries its own [`MessageDecoder`] so
//! partial frames survive between readiness events.

use std::io::Read;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use crate::error::Result;

use super::framing::MessageDecoder;
use super::Message;

/// One framed, non-blocking connection.
pub struct FramedStream {
    stream: TcpStream,
    decoder: MessageDecoder,
    peer: SocketAddr,
}

impl FramedStream {
    /// Start a non-blocking connect; the stream becomes readable once the
    /// peer has data for us.
    pub fn connect(peer: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(peer)?;
        Ok(FramedStream {
            stream,
            decoder: MessageDecoder::default(),
            peer,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read everything currently available. Returns the decoded messages
    /// and whether the connection is still alive.
    fn drain(&mut self, out: &mut Vec<Message>) -> bool {
        loop {
            match self.decoder.decode_from(&mut self.stream) {
                Ok(Some(msg)) => out.push(msg),
                Ok(None) => return true,
                Err(e) => {
                    log::debug!("[POLL] connection to {} closed: {}", self.peer, e);
                    return false;
                }
            }
        }
    }
}

// Read is implemented on the mio stream itself; decode_from needs &mut R.
impl Read for FramedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

/// A batch of messages from one connection, plus its liveness.
pub struct PollEvent {
    pub token: Token,
    pub messages: Vec<Message>,
    pub closed: bool,
}

/// mio-based poller over a dynamic set of [`FramedStream`]s.
pub struct StreamPoller {
    poll: Poll,
    events: Events,
    streams: Vec<(Token, FramedStream)>,
    next_token: usize,
}

impl StreamPoller {
    pub fn new() -> Result<Self> {
        Ok(StreamPoller {
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            streams: Vec::new(),
            next_token: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Register a connection and return its token.
    pub fn add(&mut self, mut stream: FramedStream) -> Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut stream.stream, token, Interest::READABLE)?;
        self.streams.push((token, stream));
        Ok(token)
    }

    /// Deregister and drop a connection.
    pub fn remove(&mut self, token: Token) -> Result<()> {
        if let Some(pos) = self.streams.iter().position(|(t, _)| *t == token) {
            let (_, mut stream) = self.streams.remove(pos);
            self.poll.registry().deregister(&mut stream.stream)?;
        }
        Ok(())
    }

    /// Wait up to `timeout` for readiness and collect everything readable.
    /// Closed connections are reported once with `closed: true` and removed
    /// from the poll set by the caller via [`remove`](Self::remove).
    pub fn poll(&mut self, timeout: Duration) -> Result<Vec<PollEvent>> {
        self.events.clear();
        self.poll.poll(&mut self.events, Some(timeout))?;

        let mut results: Vec<PollEvent> = Vec::new();
        for event in self.events.iter() {
            let token = event.token();
            let Some((_, stream)) = self.streams.iter_mut().find(|(t, _)| *t == token) else {
                continue;
            };
            let mut messages = Vec::new();
            let alive = stream.drain(&mut messages);
            if let Some(existing) = results.iter_mut().find(|r| r.token == token) {
                existing.messages.extend(messages);
                existing.closed |= !alive;
            } else {
                results.push(PollEvent {
                    token,
                    messages,
                    closed: !alive,
                });
            }
        }
        Ok(results)
    }
}
