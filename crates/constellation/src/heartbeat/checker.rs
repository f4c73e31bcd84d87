// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer liveness tracking from received heartbeats.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::Token;
use parking_lot::Mutex;

use crate::error::Result;
use crate::fsm::State;
use crate::protocol::Heartbeat;
use crate::transport::{FramedStream, StreamPoller};

use super::{DEFAULT_FAIL_MISSES, DEFAULT_PERIOD_MS, MISS_FACTOR, PROMISE_FACTOR};

/// Snapshot of one tracked peer.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub addr: SocketAddr,
    /// Known after the first heartbeat arrived.
    pub name: Option<String>,
    pub state: Option<State>,
    pub misses: u32,
    pub failed: bool,
}

struct PeerRecord {
    name: Option<String>,
    state: Option<State>,
    last_seen: Instant,
    promised: Duration,
    misses: u32,
    failed: bool,
}

impl PeerRecord {
    fn new() -> Self {
        PeerRecord {
            name: None,
            state: None,
            last_seen: Instant::now(),
            promised: Duration::from_millis(
                (DEFAULT_PERIOD_MS as f64 * PROMISE_FACTOR) as u64,
            ),
            misses: 0,
            failed: false,
        }
    }
}

type FailureCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Subscribes to peer heartbeat publishers and applies the miss rule.
pub struct HeartbeatChecker {
    poller: Mutex<StreamPoller>,
    tokens: Mutex<HashMap<Token, SocketAddr>>,
    peers: Mutex<HashMap<SocketAddr, PeerRecord>>,
    fail_misses: u32,
    on_failure: Mutex<Vec<FailureCallback>>,
}

impl HeartbeatChecker {
    pub fn new() -> Result<Arc<Self>> {
        Ok(Arc::new(HeartbeatChecker {
            poller: Mutex::new(StreamPoller::new()?),
            tokens: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            fail_misses: DEFAULT_FAIL_MISSES,
            on_failure: Mutex::new(Vec::new()),
        }))
    }

    /// Register a callback fired once per peer when it crosses the failure
    /// threshold. The argument is the peer's name (or address, before the
    /// first heartbeat named it).
    pub fn on_failure(&self, callback: FailureCallback) {
        self.on_failure.lock().push(callback);
    }

    /// Track a peer's heartbeat service (beacon OFFER path).
    pub fn add_peer(&self, addr: SocketAddr) -> Result<()> {
        let stream = FramedStream::connect(addr)?;
        let token = self.poller.lock().add(stream)?;
        self.tokens.lock().insert(token, addr);
        self.peers.lock().insert(addr, PeerRecord::new());
        log::debug!("[CHP] tracking heartbeats from {}", addr);
        Ok(())
    }

    /// Stop tracking a peer (beacon DEPART path); an orderly departure is
    /// not a failure.
    pub fn remove_peer(&self, addr: SocketAddr) {
        let token = {
            let tokens = self.tokens.lock();
            tokens
                .iter()
                .find(|(_, a)| **a == addr)
                .map(|(t, _)| *t)
        };
        if let Some(token) = token {
            let _ = self.poller.lock().remove(token);
            self.tokens.lock().remove(&token);
        }
        self.peers.lock().remove(&addr);
        log::debug!("[CHP] stopped tracking {}", addr);
    }

    pub fn peers(&self) -> Vec<PeerStatus> {
        self.peers
            .lock()
            .iter()
            .map(|(addr, r)| PeerStatus {
                addr: *addr,
                name: r.name.clone(),
                state: r.state,
                misses: r.misses,
                failed: r.failed,
            })
            .collect()
    }

    fn record(&self, addr: SocketAddr, hb: &Heartbeat) {
        let mut peers = self.peers.lock();
        let record = peers.entry(addr).or_insert_with(PeerRecord::new);
        record.name = Some(hb.sender.clone());
        record.state = State::from_code(hb.state_code).ok();
        record.last_seen = Instant::now();
        record.promised = Duration::from_millis(hb.interval_ms);
        record.misses = 0;
    }

    fn check_deadlines(&self) {
        let now = Instant::now();
        let mut failures = Vec::new();
        {
            let mut peers = self.peers.lock();
            for (addr, record) in peers.iter_mut() {
                if record.failed {
                    continue;
                }
                let deadline = record.last_seen + record.promised.mul_f64(MISS_FACTOR);
                if now > deadline {
                    record.misses += 1;
                    record.last_seen = now;
                    let who = record.name.clone().unwrap_or_else(|| addr.to_string());
                    log::warn!(
                        "[CHP] heartbeat from {} missed ({}/{})",
                        who,
                        record.misses,
                        self.fail_misses
                    );
                    if record.misses >= self.fail_misses {
                        record.failed = true;
                        failures.push(who);
                    }
                }
            }
        }
        for who in failures {
            log::error!("[CHP] peer {} failed heartbeat checks", who);
            let callbacks = self.on_failure.lock();
            for callback in callbacks.iter() {
                callback(&who);
            }
        }
    }

    /// Worker loop: poll subscriptions with a 250 ms timeout and evaluate
    /// miss deadlines every pass.
    pub fn run(&self, stop: &Arc<AtomicBool>) {
        log::debug!("[CHP] checker started");
        while !stop.load(Ordering::Relaxed) {
            let events = {
                let mut poller = self.poller.lock();
                match poller.poll(Duration::from_millis(250)) {
                    Ok(events) => events,
                    Err(e) => {
                        log::warn!("[CHP] poll failed: {}", e);
                        std::thread::sleep(Duration::from_millis(250));
                        continue;
                    }
                }
            };
            for event in events {
                let addr = self.tokens.lock().get(&event.token).copied();
                let Some(addr) = addr else { continue };
                for msg in &event.messages {
                    match Heartbeat::decode(msg) {
                        Ok(hb) => self.record(addr, &hb),
                        Err(e) => log::warn!("[CHP] {}", e),
                    }
                }
                if event.closed {
                    // connection gone; keep the record so the miss rule
                    // decides between failure and orderly departure
                    let _ = self.poller.lock().remove(event.token);
                    self.tokens.lock().remove(&event.token);
                }
            }
            self.check_deadlines();
        }
        log::debug!("[CHP] checker shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PubSocket;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_live_peer_is_not_failed() {
        let publisher = PubSocket::bind("127.0.0.1", 0).unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], publisher.port()));

        let checker = HeartbeatChecker::new().unwrap();
        checker.add_peer(addr).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let checker = Arc::clone(&checker);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || checker.run(&stop))
        };

        // publish well inside the promise for a while
        for _ in 0..10 {
            let frames = Heartbeat::encode("peer", State::Run as u8, 200).unwrap();
            publisher.publish(&frames).unwrap();
            std::thread::sleep(Duration::from_millis(100));
        }

        let peers = checker.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name.as_deref(), Some("peer"));
        assert_eq!(peers[0].state, Some(State::Run));
        assert!(!peers[0].failed);

        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
    }

    #[test]
    fn test_silent_peer_fails_after_three_misses() {
        let publisher = PubSocket::bind("127.0.0.1", 0).unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], publisher.port()));

        let checker = HeartbeatChecker::new().unwrap();
        checker.add_peer(addr).unwrap();
        let failures = Arc::new(AtomicUsize::new(0));
        {
            let failures = Arc::clone(&failures);
            checker.on_failure(Box::new(move |_| {
                failures.fetch_add(1, Ordering::Relaxed);
            }));
        }
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let checker = Arc::clone(&checker);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || checker.run(&stop))
        };

        // two heartbeats with a short promise, then silence
        for _ in 0..2 {
            let frames = Heartbeat::encode("peer", State::Run as u8, 100).unwrap();
            publisher.publish(&frames).unwrap();
            std::thread::sleep(Duration::from_millis(50));
        }

        // 3 misses x 1.5 x 100 ms plus poll slack
        let deadline = Instant::now() + Duration::from_secs(5);
        while failures.load(Ordering::Relaxed) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(failures.load(Ordering::Relaxed), 1);
        assert!(checker.peers()[0].failed);

        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
    }

    #[test]
    fn test_departed_peer_does_not_fail() {
        let publisher = PubSocket::bind("127.0.0.1", 0).unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], publisher.port()));

        let checker = HeartbeatChecker::new().unwrap();
        checker.add_peer(addr).unwrap();
        let failures = Arc::new(AtomicUsize::new(0));
        {
            let failures = Arc::clone(&failures);
            checker.on_failure(Box::new(move |_| {
                failures.fetch_add(1, Ordering::Relaxed);
            }));
        }

        checker.remove_peer(addr);
        assert!(checker.peers().is_empty());

        // run briefly; nothing should fire
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let checker = Arc::clone(&checker);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || checker.run(&stop))
        };
        std::thread::sleep(Duration::from_millis(500));
        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
        assert_eq!(failures.load(Ordering::Relaxed), 0);
    }
}
