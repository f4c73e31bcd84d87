// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The data producer.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::beacon::BroadcastManager;
use crate::error::{Error, Result};
use crate::protocol::pack::{self, MetaMap, Value};
use crate::protocol::{CdtpMessage, DataKind, ServiceKind};
use crate::transport::PushSocket;

/// Bound CDTP stream with the run's sequence counter.
///
/// Per run: `begin_run` sends BOR with sequence 0 and snapshots the run
/// configuration into its meta; every `send_data` increments the sequence;
/// `end_run` sends EOR at last+1 carrying the run statistics.
pub struct DataSender {
    socket: PushSocket,
    name: String,
    seq: u64,
    in_run: bool,
    run_id: String,
    frames_sent: u64,
    run_started_ns: u64,
}

impl DataSender {
    pub fn bind(name: &str, interface: &str, port: u16) -> Result<Self> {
        let socket = PushSocket::bind(interface, port)?;
        log::info!("[CDTP] data sender bound on port {}", socket.port());
        Ok(DataSender {
            socket,
            name: name.to_string(),
            seq: 0,
            in_run: false,
            run_id: String::new(),
            frames_sent: 0,
            run_started_ns: 0,
        })
    }

    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    /// Announce the DATA service on the beacon.
    pub fn announce(&self, beacon: &Arc<BroadcastManager>) {
        beacon.register_service(ServiceKind::Data, self.port());
    }

    /// Handle that aborts a blocked send during shutdown.
    pub fn close_handle(&self) -> Arc<AtomicBool> {
        self.socket.close_handle()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Accept pending consumer connects and report how many are attached.
    pub fn consumer_count(&self) -> usize {
        self.socket.poll_peers()
    }

    /// Begin a run: sequence restarts at 0, the run identifier is echoed in
    /// the BOR meta.
    pub fn begin_run(
        &mut self,
        run_id: &str,
        meta: Option<MetaMap>,
        payload: &[Vec<u8>],
    ) -> Result<()> {
        if self.in_run {
            return Err(Error::InvalidState {
                reason: format!("run '{}' still open", self.run_id),
            });
        }
        let mut meta = meta.unwrap_or_default();
        meta.insert("run_id".into(), Value::from(run_id));
        self.seq = 0;
        let frames =
            CdtpMessage::encode_frames(&self.name, DataKind::Bor, self.seq, Some(&meta), payload)?;
        self.socket.send(&frames)?;
        self.in_run = true;
        self.run_id = run_id.to_string();
        self.frames_sent = 0;
        self.run_started_ns = pack::now_nanos();
        log::info!("[CDTP] begin of run '{}'", run_id);
        Ok(())
    }

    /// Send one data message; multi-frame payloads keep their boundaries.
    pub fn send_data(&mut self, payload: &[Vec<u8>], meta: Option<&MetaMap>) -> Result<()> {
        if !self.in_run {
            return Err(Error::InvalidState {
                reason: "DAT before BOR".into(),
            });
        }
        self.seq += 1;
        let frames =
            CdtpMessage::encode_frames(&self.name, DataKind::Dat, self.seq, meta, payload)?;
        self.socket.send(&frames)?;
        self.frames_sent += 1;
        Ok(())
    }

    /// End the run; EOR meta carries the run statistics.
    pub fn end_run(&mut self, meta: Option<MetaMap>) -> Result<()> {
        if !self.in_run {
            return Err(Error::InvalidState {
                reason: "EOR without BOR".into(),
            });
        }
        let mut meta = meta.unwrap_or_default();
        meta.insert("run_id".into(), Value::from(self.run_id.as_str()));
        meta.insert("frames_sent".into(), Value::from(self.frames_sent));
        let span_ns = pack::now_nanos().saturating_sub(self.run_started_ns);
        meta.insert("duration_s".into(), Value::F64(span_ns as f64 / 1e9));
        let frames = CdtpMessage::encode_frames(
            &self.name,
            DataKind::Eor,
            self.seq + 1,
            Some(&meta),
            &[],
        )?;
        self.socket.send(&frames)?;
        self.in_run = false;
        log::info!(
            "[CDTP] end of run '{}' after {} data messages",
            self.run_id,
            self.frames_sent
        );
        Ok(())
    }
}
