// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! constellation-record - run-file data receiver satellite.
//!
//! Usage:
//!   constellation-record --name recorder --group lab
//!   constellation-record --inspect data/run_42.rundat

use std::path::PathBuf;

use clap::Parser;

use constellation::data::DataReceiver;
use constellation::monitoring::logging;
use constellation::{Satellite, SatelliteOptions};
use constellation_recording::{RunFile, RunFileWriter};

#[derive(Parser, Debug)]
#[command(name = "constellation-record")]
#[command(about = "Record Constellation data runs to file")]
#[command(version)]
struct Args {
    /// Canonical satellite name
    #[arg(long, default_value = "run_recorder")]
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

    /// Log level (trace, debug, info, warning, error, critical)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Inspect an existing run file instead of running the satellite
    #[arg(long)]
    inspect: Option<PathBuf>,
}

fn inspect(path: &PathBuf) -> anyhow::Result<()> {
    let mut file = RunFile::open(path)?;
    println!("{}: {} messages", path.display(), file.message_count());
    while let Some(record) = file.next_record()? {
        println!(
            "  {} {} seq={} frames={} meta={:?}",
            record.sender,
            record.kind,
            record.seq,
            record.payload.len(),
            record.meta()?
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.inspect {
        return inspect(path);
    }

    let level = logging::parse_level(&args.log_level)
        .ok_or_else(|| anyhow::anyhow!("unknown log level '{}'", args.log_level))?;
    logging::init(level);

    let receiver = DataReceiver::new(RunFileWriter::new());
    let sources = receiver.sources();

    let mut options = SatelliteOptions::new(&args.name, &args.group);
    options.interface = args.interface;
    options.cmd_port = args.cmd_port;
    options.mon_port = args.mon_port;
    options.hb_port = args.hb_port;

    let satellite = Satellite::new(options, receiver)?;
    sources.register_discovery(satellite.beacon());
    log::info!("[REC] {} ready, waiting for controller", satellite.name());

    ctrlc::set_handler(move || {
        log::info!("[REC] interrupted, exiting");
        std::process::exit(0);
    })?;

    satellite.run()?;
    Ok(())
}
