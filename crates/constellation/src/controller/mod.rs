// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller composition layer for CLI/GUI front-ends.
//!
//! Runs a beacon listener filtered on CONTROL offers, keeps one command
//! transmitter per discovered satellite keyed by canonical name, and fans
//! verbs out to all peers concurrently. The aggregate state is the maximum
//! of the peer states in severity order (ERROR above transitional above
//! RUN above ORBIT, see [`State::severity`]).

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::beacon::BroadcastManager;
use crate::error::{Error, Result};
use crate::fsm::State;
use crate::protocol::pack::Value;
use crate::protocol::{CscpReply, CscpRequest, ReplyVerb, ServiceKind};
use crate::transport::RequestSocket;

/// One request/reply connection to a satellite's command endpoint.
pub struct CommandTransmitter {
    sender_name: String,
    socket: Mutex<RequestSocket>,
}

impl CommandTransmitter {
    pub fn connect(sender_name: &str, addr: SocketAddr) -> Result<Self> {
        Ok(CommandTransmitter {
            sender_name: sender_name.to_string(),
            socket: Mutex::new(RequestSocket::connect(addr)?),
        })
    }

    /// Send one verb and decode the reply.
    pub fn request(&self, verb: &str, payload: Option<Value>) -> Result<CscpReply> {
        let request = CscpRequest::new(&self.sender_name, verb, payload);
        let frames = request.encode()?;
        let reply = self.socket.lock().request(&frames)?;
        CscpReply::decode(&reply)
    }

    /// `get_name` round trip, used to learn the peer's canonical name.
    pub fn peer_name(&self) -> Result<String> {
        let reply = self.request("get_name", None)?;
        if reply.verb != ReplyVerb::Success {
            return Err(Error::InvalidState {
                reason: format!("get_name replied {:?}", reply.verb),
            });
        }
        Ok(reply.message)
    }
}

/// Supervises the satellites of one constellation group.
pub struct Controller {
    name: String,
    beacon: Arc<BroadcastManager>,
    peers: Arc<Mutex<BTreeMap<String, Arc<CommandTransmitter>>>>,
    by_uuid: Arc<Mutex<HashMap<Uuid, String>>>,
}

impl Controller {
    /// Start discovery for the group and connect to every CONTROL offer.
    pub fn new(name: &str, group: &str, interface: &str) -> Result<Self> {
        let beacon = BroadcastManager::new(name, group, interface)?;
        let peers: Arc<Mutex<BTreeMap<String, Arc<CommandTransmitter>>>> =
            Arc::new(Mutex::new(BTreeMap::new()));
        let by_uuid: Arc<Mutex<HashMap<Uuid, String>>> = Arc::new(Mutex::new(HashMap::new()));

        {
            let peers = Arc::clone(&peers);
            let by_uuid = Arc::clone(&by_uuid);
            let controller_name = name.to_string();
            beacon.register_callback(
                ServiceKind::Control,
                Box::new(move |service| {
                    if service.alive {
                        let addr = SocketAddr::new(service.address, service.port);
                        let peers = Arc::clone(&peers);
                        let by_uuid = Arc::clone(&by_uuid);
                        let controller_name = controller_name.clone();
                        let host_uuid = service.host_uuid;
                        // connecting involves a get_name round trip; keep
                        // it off the beacon listener thread
                        std::thread::spawn(move || {
                            match connect_peer(&controller_name, addr) {
                                Ok((peer_name, transmitter)) => {
                                    log::info!(
                                        "[CTL] connected to {} at {}",
                                        peer_name,
                                        addr
                                    );
                                    by_uuid.lock().insert(host_uuid, peer_name.clone());
                                    peers.lock().insert(peer_name, Arc::new(transmitter));
                                }
                                Err(e) => {
                                    log::warn!("[CTL] connect to {} failed: {}", addr, e)
                                }
                            }
                        });
                    } else {
                        let name = by_uuid.lock().remove(&service.host_uuid);
                        if let Some(name) = name {
                            log::info!("[CTL] departure of {}", name);
                            peers.lock().remove(&name);
                        }
                    }
                }),
            );
        }
        beacon.start();
        beacon.request(ServiceKind::Control);

        Ok(Controller {
            name: name.to_string(),
            beacon,
            peers,
            by_uuid,
        })
    }

    pub fn beacon(&self) -> &Arc<BroadcastManager> {
        &self.beacon
    }

    /// Add a peer without discovery (static setups and tests).
    pub fn add_peer(&self, addr: SocketAddr) -> Result<String> {
        let (peer_name, transmitter) = connect_peer(&self.name, addr)?;
        self.peers
            .lock()
            .insert(peer_name.clone(), Arc::new(transmitter));
        Ok(peer_name)
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.peers.lock().keys().cloned().collect()
    }

    /// Send a verb to one satellite or fan it out to all of them, one
    /// request per peer in parallel. Returns a per-peer reply map.
    pub fn command(
        &self,
        verb: &str,
        target: Option<&str>,
        payload: Option<Value>,
    ) -> BTreeMap<String, Result<CscpReply>> {
        let selected: Vec<(String, Arc<CommandTransmitter>)> = {
            let peers = self.peers.lock();
            peers
                .iter()
                .filter(|(name, _)| target.map(|t| t == name.as_str()).unwrap_or(true))
                .map(|(name, tm)| (name.clone(), Arc::clone(tm)))
                .collect()
        };

        let mut replies = BTreeMap::new();
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (name, transmitter) in &selected {
                let payload = payload.clone();
                handles.push((
                    name.clone(),
                    scope.spawn(move || transmitter.request(verb, payload)),
                ));
            }
            for (name, handle) in handles {
                let reply = handle.join().unwrap_or_else(|_| {
                    Err(Error::InvalidState {
                        reason: "request worker panicked".into(),
                    })
                });
                replies.insert(name, reply);
            }
        });
        replies
    }

    /// Per-peer lifecycle states via `get_state` fan-out.
    pub fn states(&self) -> BTreeMap<String, Option<State>> {
        self.command("get_state", None, None)
            .into_iter()
            .map(|(name, reply)| {
                let state = reply
                    .ok()
                    .filter(|r| r.verb == ReplyVerb::Success)
                    .and_then(|r| State::parse(&r.message).ok());
                (name, state)
            })
            .collect()
    }

    /// Aggregate state: the most severe of the peer states.
    pub fn state(&self) -> Option<State> {
        self.states()
            .into_values()
            .flatten()
            .max_by_key(|s| s.severity())
    }

    /// One-line-per-peer summary.
    pub fn status(&self) -> String {
        let states = self.states();
        if states.is_empty() {
            return "no satellites connected".to_string();
        }
        states
            .iter()
            .map(|(name, state)| {
                format!(
                    "{}: {}",
                    name,
                    state.map(|s| s.label()).unwrap_or("unreachable")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn shutdown(&self) {
        self.beacon.shutdown();
    }
}

fn connect_peer(
    controller_name: &str,
    addr: SocketAddr,
) -> Result<(String, CommandTransmitter)> {
    let transmitter = CommandTransmitter::connect(controller_name, addr)?;
    let peer_name = transmitter.peer_name()?;
    Ok((peer_name, transmitter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReplySocket;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Minimal command endpoint: answers get_name and get_state.
    fn fake_satellite(name: &'static str, state: State) -> (SocketAddr, Arc<AtomicBool>) {
        let mut rep = ReplySocket::bind("127.0.0.1", 0).unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], rep.port()));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);
        std::thread::spawn(move || {
            while !stop_worker.load(Ordering::Relaxed) {
                if let Ok(Some(frames)) = rep.poll_request(Duration::from_millis(20)) {
                    let request = CscpRequest::decode(&frames).unwrap();
                    let reply = match request.verb.as_str() {
                        "get_name" => CscpReply::new(name, ReplyVerb::Success, name),
                        "get_state" => CscpReply::new(name, ReplyVerb::Success, state.label()),
                        _ => CscpReply::new(name, ReplyVerb::Unknown, "unknown"),
                    };
                    let _ = rep.send_reply(&reply.encode().unwrap());
                }
            }
        });
        (addr, stop)
    }

    #[test]
    fn test_fan_out_and_aggregate_state() {
        let (addr_a, stop_a) = fake_satellite("sat_a", State::Orbit);
        let (addr_b, stop_b) = fake_satellite("sat_b", State::Error);

        let controller = Controller::new("ctl", "g_ctl_test", "127.0.0.1").unwrap();
        assert_eq!(controller.add_peer(addr_a).unwrap(), "sat_a");
        assert_eq!(controller.add_peer(addr_b).unwrap(), "sat_b");

        let replies = controller.command("get_state", None, None);
        assert_eq!(replies.len(), 2);
        assert!(replies.values().all(|r| r.is_ok()));

        // ERROR dominates the aggregate
        assert_eq!(controller.state(), Some(State::Error));
        let status = controller.status();
        assert!(status.contains("sat_a: ORBIT"));
        assert!(status.contains("sat_b: ERROR"));

        // targeted command hits one peer only
        let replies = controller.command("get_state", Some("sat_a"), None);
        assert_eq!(replies.len(), 1);
        assert!(replies.contains_key("sat_a"));

        stop_a.store(true, Ordering::Relaxed);
        stop_b.store(true, Ordering::Relaxed);
        controller.shutdown();
    }
}
