// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! constellation-ctl - command satellites of a constellation group.
//!
//! Usage:
//!   constellation-ctl --group lab list
//!   constellation-ctl --group lab state
//!   constellation-ctl --group lab command initialize --set gain=2
//!   constellation-ctl --group lab command start --run-id r1 --target sat_a
//!   constellation-ctl --group lab command shutdown

use std::time::Duration;

use clap::{Parser, Subcommand};

use constellation::monitoring::logging;
use constellation::protocol::{ReplyVerb, Value};
use constellation::Controller;

#[derive(Parser, Debug)]
#[command(name = "constellation-ctl")]
#[command(about = "Command satellites of a constellation group")]
#[command(version)]
struct Args {
    /// Controller name on the command channel
    #[arg(long, default_value = "ctl")]
    name: String,

    /// Constellation group
    #[arg(long, default_value = "constellation")]
    group: String,

    /// Bind interface; * means all
    #[arg(long, default_value = "*")]
    interface: String,

    /// Seconds to wait for discovery before acting
    #[arg(long, default_value = "2")]
    discover_wait: u64,

    /// Log level (trace, debug, info, warning, error, critical)
    #[arg(long, default_value = "warning")]
    log_level: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List discovered satellites
    List,
    /// Show per-satellite and aggregate state
    State,
    /// Send a verb to all satellites (or one with --target)
    Command {
        /// The verb, e.g. initialize, launch, start, stop, land, shutdown
        verb: String,

        /// Address one satellite by canonical name instead of all
        #[arg(long)]
        target: Option<String>,

        /// Configuration entries for initialize/reconfigure (key=value)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Run identifier for start
        #[arg(long)]
        run_id: Option<String>,
    },
}

/// Parse `key=value` pairs into typed values: integers, floats and booleans
/// are recognised, everything else stays a string.
fn parse_settings(pairs: &[String]) -> anyhow::Result<Vec<(Value, Value)>> {
    let mut entries = Vec::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got '{}'", pair))?;
        let value = if let Ok(v) = raw.parse::<i64>() {
            Value::from(v)
        } else if let Ok(v) = raw.parse::<f64>() {
            Value::F64(v)
        } else if let Ok(v) = raw.parse::<bool>() {
            Value::Boolean(v)
        } else {
            Value::from(raw)
        };
        entries.push((Value::from(key), value));
    }
    Ok(entries)
}

fn payload_for(verb: &str, set: &[String], run_id: Option<&str>) -> anyhow::Result<Option<Value>> {
    match verb {
        "start" => {
            let run_id =
                run_id.ok_or_else(|| anyhow::anyhow!("start requires --run-id"))?;
            Ok(Some(Value::from(run_id)))
        }
        _ if !set.is_empty() => Ok(Some(Value::Map(parse_settings(set)?))),
        _ => Ok(None),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = logging::parse_level(&args.log_level)
        .ok_or_else(|| anyhow::anyhow!("unknown log level '{}'", args.log_level))?;
    logging::init(level);

    let controller = Controller::new(&args.name, &args.group, &args.interface)?;
    log::info!(
        "[CTL] discovering group '{}' for {} s",
        args.group,
        args.discover_wait
    );
    std::thread::sleep(Duration::from_secs(args.discover_wait));
    log::info!(
        "[CTL] {} satellites connected",
        controller.peer_names().len()
    );

    let mut failures = 0usize;
    match &args.action {
        Action::List => {
            let names = controller.peer_names();
            if names.is_empty() {
                println!("no satellites discovered in group '{}'", args.group);
            }
            for name in names {
                println!("{}", name);
            }
        }
        Action::State => {
            println!("{}", controller.status());
            match controller.state() {
                Some(state) => println!("aggregate: {}", state),
                None => println!("aggregate: unknown"),
            }
        }
        Action::Command {
            verb,
            target,
            set,
            run_id,
        } => {
            let payload = payload_for(verb, set, run_id.as_deref())?;
            let replies = controller.command(verb, target.as_deref(), payload);
            if replies.is_empty() {
                anyhow::bail!("no satellites matched");
            }
            for (name, reply) in replies {
                match reply {
                    Ok(reply) => {
                        println!("{}: {:?} - {}", name, reply.verb, reply.message);
                        if reply.verb != ReplyVerb::Success {
                            log::error!(
                                "[CTL] {} refused '{}': {}",
                                name,
                                verb,
                                reply.message
                            );
                            failures += 1;
                        }
                    }
                    Err(e) => {
                        log::error!("[CTL] request to {} failed: {}", name, e);
                        println!("{}: request failed - {}", name, e);
                        failures += 1;
                    }
                }
            }
        }
    }

    controller.shutdown();
    if failures > 0 {
        anyhow::bail!("{} satellites did not report success", failures);
    }
    Ok(())
}
