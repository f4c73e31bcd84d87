// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! constellation-probe - demo data producer.
//!
//! A satellite that streams random payloads over CDTP: the reference
//! producer for end-to-end tests of receivers and monitors.
//!
//! Usage:
//!   constellation-probe --name probe_a --group lab
//!   then drive it with constellation-ctl: initialize, launch, start.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use constellation::data::DataSender;
use constellation::monitoring::logging;
use constellation::protocol::{MetricsType, ServiceKind, Value};
use constellation::satellite::{CancellationToken, SatelliteHandler};
use constellation::{Configuration, Result, Satellite, SatelliteOptions};

#[derive(Parser, Debug)]
#[command(name = "constellation-probe")]
#[command(about = "Demo satellite streaming random data")]
#[command(version)]
struct Args {
    /// Canonical satellite name
    #[arg(long, default_value = "probe")]
    name: String,

    /// Constellation group
    #[arg(long, default_value = "constellation")]
    group: String,

    /// Bind interface; * means all
    #[arg(long, default_value = "*")]
    interface: String,

    /// Command port (0 = ephemeral)
    #[arg(long, default_value = "0")]
    cmd_port: u16,

    /// Monitoring port (0 = ephemeral)
    #[arg(long, default_value = "0")]
    mon_port: u16,

    /// Heartbeat port (0 = ephemeral)
    #[arg(long, default_value = "0")]
    hb_port: u16,

    /// Data port (0 = ephemeral)
    #[arg(long, default_value = "0")]
    data_port: u16,

    /// Log level (trace, debug, info, warning, error, critical)
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct ProbeHandler {
    sender: DataSender,
    payload_size: usize,
    frame_interval: Duration,
    run_id: String,
    frames_emitted: Arc<AtomicU64>,
}

impl SatelliteHandler for ProbeHandler {
    fn class_name(&self) -> &'static str {
        "Probe"
    }

    fn do_initializing(&mut self, config: &mut Configuration) -> Result<String> {
        self.payload_size = config.get_u64_or("payload_size", 1024)? as usize;
        let interval_ms = config.get_u64_or("frame_interval_ms", 100)?;
        self.frame_interval = Duration::from_millis(interval_ms);
        Ok(format!(
            "emitting {} byte payloads every {} ms",
            self.payload_size, interval_ms
        ))
    }

    fn do_starting(&mut self, run_id: &str) -> Result<String> {
        self.run_id = run_id.to_string();
        Ok(format!("armed for run {}", run_id))
    }

    fn do_run(&mut self, token: &CancellationToken) -> Result<String> {
        // hold the BOR until a consumer is attached
        while self.sender.consumer_count() == 0 {
            if token.wait_timeout(Duration::from_millis(100)) {
                return Ok("run ended before any consumer connected".into());
            }
        }
        self.sender.begin_run(&self.run_id, None, &[])?;

        let mut emitted = 0u64;
        while !token.wait_timeout(self.frame_interval) {
            let mut payload = vec![0u8; self.payload_size];
            for byte in payload.iter_mut() {
                *byte = fastrand::u8(..);
            }
            self.sender.send_data(&[payload], None)?;
            emitted += 1;
            self.frames_emitted.fetch_add(1, Ordering::Relaxed);
        }

        self.sender.end_run(None)?;
        Ok(format!("run {} closed after {} frames", self.run_id, emitted))
    }

    fn do_interrupting(&mut self) -> Result<String> {
        Ok("probe idle".into())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = logging::parse_level(&args.log_level)
        .ok_or_else(|| anyhow::anyhow!("unknown log level '{}'", args.log_level))?;
    logging::init(level);

    let sender = DataSender::bind(&args.name, &args.interface, args.data_port)?;
    let data_port = sender.port();
    let close_handle = sender.close_handle();
    let frames_emitted = Arc::new(AtomicU64::new(0));
    let handler = ProbeHandler {
        sender,
        payload_size: 1024,
        frame_interval: Duration::from_millis(100),
        run_id: String::new(),
        frames_emitted: Arc::clone(&frames_emitted),
    };

    let mut options = SatelliteOptions::new(&args.name, &args.group);
    options.interface = args.interface;
    options.cmd_port = args.cmd_port;
    options.mon_port = args.mon_port;
    options.hb_port = args.hb_port;

    let satellite = Satellite::new(options, handler)?;
    satellite
        .beacon()
        .register_service(ServiceKind::Data, data_port);
    satellite.monitoring().schedule_metric(
        "frames_emitted",
        "",
        MetricsType::Accumulate,
        Duration::from_secs(5),
        Box::new(move || Ok(Value::from(frames_emitted.load(Ordering::Relaxed)))),
    );

    ctrlc::set_handler(move || {
        close_handle.store(true, std::sync::atomic::Ordering::Relaxed);
        log::info!("[PROBE] interrupted, exiting");
        std::process::exit(0);
    })?;

    satellite.run()?;
    Ok(())
}
