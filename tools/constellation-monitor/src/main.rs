// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! constellation-monitor - subscribe to a group's logs and metrics.
//!
//! Usage:
//!   constellation-monitor --group lab
//!   constellation-monitor --group lab --output-path ./monitoring

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use constellation::monitoring::{logging, MonitoringListener};

#[derive(Parser, Debug)]
#[command(name = "constellation-monitor")]
#[command(about = "Subscribe to a constellation group's logs and metrics")]
#[command(version)]
struct Args {
    /// Monitor name
    #[arg(long, default_value = "basic_monitor")]
    name: String,

    /// Constellation group
    #[arg(long, default_value = "constellation")]
    group: String,

    /// Bind interface; * means all
    #[arg(long, default_value = "*")]
    interface: String,

    /// Directory for log and metric files; print-only when omitted
    #[arg(short, long, default_value = "")]
    output_path: String,

    /// Log level (trace, debug, info, warning, error, critical)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = logging::parse_level(&args.log_level)
        .ok_or_else(|| anyhow::anyhow!("unknown log level '{}'", args.log_level))?;
    logging::init(level);

    let listener =
        MonitoringListener::new(&args.name, &args.group, &args.interface, &args.output_path)?;
    if args.output_path.is_empty() {
        log::info!("[MON] no output path configured, printing metrics");
    } else {
        log::info!("[MON] writing logs and metrics below {}", args.output_path);
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            log::info!("[MON] interrupted, shutting down");
            stop.store(true, Ordering::Relaxed);
        })?;
    }

    listener.run(&stop);
    Ok(())
}
