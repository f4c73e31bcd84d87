// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Beacon worker: the live service table and its callbacks.
//!
//! The listener thread owns the receive path; the table is a concurrent map
//! keyed by `(host_uuid, service_kind)`, so repeated identical OFFERs are
//! idempotent and an OFFER with a changed port replaces the previous entry.
//! Arrival of a new entry fires the callbacks registered for its service
//! kind; removal (DEPART or pruning) fires the same callbacks with
//! `alive = false`.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::chirp::{ChirpMessage, ChirpMessageType, ServiceKind};

use super::socket::BeaconSocket;

/// One row of the service table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub host_uuid: Uuid,
    pub kind: ServiceKind,
    pub address: IpAddr,
    pub port: u16,
    /// False when delivered through a removal callback.
    pub alive: bool,
}

pub type ServiceCallback = Box<dyn Fn(&DiscoveredService) + Send + Sync>;

pub struct BroadcastManager {
    socket: BeaconSocket,
    registered: Mutex<BTreeMap<ServiceKind, u16>>,
    table: DashMap<(Uuid, ServiceKind), (DiscoveredService, Instant)>,
    callbacks: Mutex<BTreeMap<ServiceKind, Vec<ServiceCallback>>>,
    stop: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastManager {
    pub fn new(name: &str, group: &str, interface: &str) -> Result<Arc<Self>> {
        Ok(Arc::new(BroadcastManager {
            socket: BeaconSocket::open(name, group, interface)?,
            registered: Mutex::new(BTreeMap::new()),
            table: DashMap::new(),
            callbacks: Mutex::new(BTreeMap::new()),
            stop: AtomicBool::new(false),
            listener: Mutex::new(None),
        }))
    }

    pub fn host_uuid(&self) -> Uuid {
        self.socket.host_uuid()
    }

    /// Publish a service: remembered for REQUEST replies and offered to the
    /// group right away.
    pub fn register_service(&self, kind: ServiceKind, port: u16) {
        self.registered.lock().insert(kind, port);
        log::info!("[CHIRP] offering {} service on port {}", kind, port);
        self.socket.broadcast(kind, ChirpMessageType::Offer, port);
    }

    /// Register a callback fired on arrival and removal of services of the
    /// given kind.
    pub fn register_callback(&self, kind: ServiceKind, callback: ServiceCallback) {
        self.callbacks.lock().entry(kind).or_default().push(callback);
    }

    /// Ask the group to re-offer services of the given kind.
    pub fn request(&self, kind: ServiceKind) {
        self.socket.broadcast(kind, ChirpMessageType::Request, 0);
    }

    /// Snapshot of live entries of one kind.
    pub fn discovered(&self, kind: ServiceKind) -> Vec<DiscoveredService> {
        self.table
            .iter()
            .filter(|e| e.key().1 == kind)
            .map(|e| e.value().0.clone())
            .collect()
    }

    /// Snapshot of the whole table.
    pub fn services(&self) -> Vec<DiscoveredService> {
        self.table.iter().map(|e| e.value().0.clone()).collect()
    }

    /// Drop entries not refreshed within `max_age`, firing removal
    /// callbacks as if a DEPART had arrived.
    pub fn prune(&self, max_age: Duration) {
        let now = Instant::now();
        let expired: Vec<_> = self
            .table
            .iter()
            .filter(|e| now.duration_since(e.value().1) > max_age)
            .map(|e| *e.key())
            .collect();
        for key in expired {
            if let Some((_, (mut service, _))) = self.table.remove(&key) {
                log::debug!(
                    "[CHIRP] pruning stale {} service of {}",
                    service.kind,
                    service.host_uuid
                );
                service.alive = false;
                self.fire(&service);
            }
        }
    }

    /// Start the listener worker.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("chirp-listener".into())
            .spawn(move || this.listen_loop())
            .expect("spawn beacon listener");
        *self.listener.lock() = Some(handle);
    }

    /// Broadcast DEPART for every registered service and stop the worker.
    pub fn shutdown(&self) {
        for (kind, port) in self.registered.lock().iter() {
            self.socket.broadcast(*kind, ChirpMessageType::Depart, *port);
        }
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.listener.lock().take() {
            let _ = handle.join();
        }
    }

    fn listen_loop(&self) {
        log::debug!("[CHIRP] listener started");
        while !self.stop.load(Ordering::Relaxed) {
            match self.socket.listen() {
                Ok(Some((msg, from))) => self.handle(msg, from),
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(e) => log::warn!("[CHIRP] {}", e),
            }
        }
        log::debug!("[CHIRP] listener shutting down");
    }

    fn handle(&self, msg: ChirpMessage, from: IpAddr) {
        match msg.msgtype {
            ChirpMessageType::Request => {
                // one OFFER per service we currently publish
                for (kind, port) in self.registered.lock().iter() {
                    self.socket.broadcast(*kind, ChirpMessageType::Offer, *port);
                }
            }
            ChirpMessageType::Offer => {
                let service = DiscoveredService {
                    host_uuid: msg.host_uuid,
                    kind: msg.kind,
                    address: from,
                    port: msg.port,
                    alive: true,
                };
                let key = (msg.host_uuid, msg.kind);
                let is_new = match self.table.insert(key, (service.clone(), Instant::now())) {
                    None => true,
                    Some((previous, _)) => previous != service,
                };
                if is_new {
                    log::info!(
                        "[CHIRP] discovered {} service of {} at {}:{}",
                        service.kind,
                        service.host_uuid,
                        from,
                        service.port
                    );
                    self.fire(&service);
                }
            }
            ChirpMessageType::Depart => {
                if let Some((_, (mut service, _))) = self.table.remove(&(msg.host_uuid, msg.kind))
                {
                    log::info!(
                        "[CHIRP] departure of {} service of {}",
                        service.kind,
                        service.host_uuid
                    );
                    service.alive = false;
                    self.fire(&service);
                }
            }
        }
    }

    fn fire(&self, service: &DiscoveredService) {
        let callbacks = self.callbacks.lock();
        if let Some(list) = callbacks.get(&service.kind) {
            for callback in list {
                callback(service);
            }
        }
    }
}
