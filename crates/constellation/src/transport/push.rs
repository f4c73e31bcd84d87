// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bound producer stream for CDTP.
//!
//! The producer binds; consumers connect on receipt of a DATA service
//! offer. Messages round-robin across connected consumers. Flow control is
//! purely the transport's backpressure: a stalled consumer makes the send
//! block, which is logged at INFO as a soft warning and otherwise ignored.

use std::collections::VecDeque;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::{bind_tcp, framing};

/// A blocking send slower than this is reported as a stalled queue.
const SLOW_SEND_WARNING: Duration = Duration::from_secs(1);

pub struct PushSocket {
    listener: TcpListener,
    port: u16,
    peers: Mutex<VecDeque<TcpStream>>,
    closed: Arc<AtomicBool>,
}

impl PushSocket {
    pub fn bind(interface: &str, port: u16) -> Result<Self> {
        let (listener, port) = bind_tcp(interface, port)?;
        listener.set_nonblocking(true)?;
        Ok(PushSocket {
            listener,
            port,
            peers: Mutex::new(VecDeque::new()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Accept pending connects and report how many consumers are attached.
    /// Lets a producer wait for its first consumer without sending.
    pub fn poll_peers(&self) -> usize {
        self.accept_pending();
        self.peer_count()
    }

    /// Handle used to abort a blocked [`send`](Self::send) from another
    /// thread during shutdown.
    pub fn close_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    fn accept_pending(&self) {
        let mut peers = self.peers.lock();
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    log::info!("[CDTP] consumer connected from {}", addr);
                    let _ = stream.set_nodelay(true);
                    peers.push_back(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("[CDTP] accept failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Send one message to the next consumer in round-robin order.
    ///
    /// Blocks until a consumer is connected and has taken the message; the
    /// only aborts are a closed socket (via [`close_handle`]) or every peer
    /// failing mid-write.
    pub fn send(&self, frames: &[Vec<u8>]) -> Result<()> {
        let encoded = {
            let borrowed: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
            framing::encode_message(&borrowed)
        };
        let mut waiting_logged = false;
        loop {
            if self.closed.load(Ordering::Relaxed) {
                return Err(Error::SendFailed {
                    reason: "push socket closed".into(),
                });
            }
            self.accept_pending();
            let stream = self.peers.lock().pop_front();
            let Some(mut stream) = stream else {
                if !waiting_logged {
                    log::info!("[CDTP] no consumer connected, send is waiting");
                    waiting_logged = true;
                }
                std::thread::sleep(Duration::from_millis(20));
                continue;
            };

            let start = Instant::now();
            match io::Write::write_all(&mut stream, &encoded) {
                Ok(()) => {
                    let elapsed = start.elapsed();
                    if elapsed > SLOW_SEND_WARNING {
                        log::info!(
                            "[CDTP] send queue full, blocking send took {} ms",
                            elapsed.as_millis()
                        );
                    }
                    self.peers.lock().push_back(stream);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("[CDTP] dropping consumer after send failure: {}", e);
                    // fall through to the next peer (or wait for one)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MessageDecoder;

    #[test]
    fn test_send_reaches_connected_consumer() {
        let push = PushSocket::bind("127.0.0.1", 0).unwrap();
        let port = push.port();

        let mut consumer = TcpStream::connect(("127.0.0.1", port)).unwrap();
        consumer
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();

        push.send(&[b"header".to_vec(), b"payload".to_vec()]).unwrap();

        let mut decoder = MessageDecoder::default();
        let mut msg = None;
        for _ in 0..50 {
            if let Some(m) = decoder.decode_from(&mut consumer).unwrap() {
                msg = Some(m);
                break;
            }
        }
        assert_eq!(
            msg.unwrap(),
            vec![b"header".to_vec(), b"payload".to_vec()]
        );
    }

    #[test]
    fn test_round_robin_between_consumers() {
        let push = PushSocket::bind("127.0.0.1", 0).unwrap();
        let port = push.port();

        let mut a = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut b = TcpStream::connect(("127.0.0.1", port)).unwrap();
        a.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        b.set_read_timeout(Some(Duration::from_millis(100))).unwrap();

        // make sure both are accepted before sending
        for _ in 0..100 {
            push.accept_pending();
            if push.peer_count() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(push.peer_count(), 2);

        push.send(&[b"m0".to_vec()]).unwrap();
        push.send(&[b"m1".to_vec()]).unwrap();

        let recv_one = |stream: &mut TcpStream| {
            let mut decoder = MessageDecoder::default();
            for _ in 0..50 {
                if let Some(m) = decoder.decode_from(stream).unwrap() {
                    return m;
                }
            }
            panic!("no message arrived");
        };
        let got_a = recv_one(&mut a);
        let got_b = recv_one(&mut b);
        let mut both = vec![got_a[0].clone(), got_b[0].clone()];
        both.sort();
        assert_eq!(both, vec![b"m0".to_vec(), b"m1".to_vec()]);
    }

    #[test]
    fn test_close_aborts_waiting_send() {
        let push = PushSocket::bind("127.0.0.1", 0).unwrap();
        let handle = push.close_handle();

        let closer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            handle.store(true, Ordering::Relaxed);
        });

        match push.send(&[b"nobody listening".to_vec()]) {
            Err(Error::SendFailed { .. }) => {}
            other => panic!("expected aborted send, got {:?}", other),
        }
        closer.join().unwrap();
    }
}
