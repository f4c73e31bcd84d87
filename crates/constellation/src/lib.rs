// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Constellation - distributed control and data acquisition
//!
//! A framework for laboratory instrumentation: independent satellite
//! processes discovered over a UDP beacon, driven through a shared
//! lifecycle by controllers, exchanging framed data streams and publishing
//! logs and metrics to monitors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use constellation::{Configuration, Result, Satellite, SatelliteOptions};
//! use constellation::satellite::SatelliteHandler;
//!
//! struct MyInstrument;
//!
//! impl SatelliteHandler for MyInstrument {
//!     fn do_initializing(&mut self, config: &mut Configuration) -> Result<String> {
//!         let gain = config.get_u64_or("gain", 1)?;
//!         Ok(format!("gain set to {}", gain))
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let options = SatelliteOptions::new("my_instrument", "lab");
//!     let satellite = Satellite::new(options, MyInstrument)?;
//!     satellite.run()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Application Layer                           |
//! |    SatelliteHandler  |  RunWriter  |  Controller front-ends        |
//! +--------------------------------------------------------------------+
//! |                          Runtime Layer                             |
//! |  Lifecycle FSM | Task Queue | Command Dispatch | Metric Scheduler  |
//! +--------------------------------------------------------------------+
//! |                         Protocol Layer                             |
//! |      CHIRP    |    CSCP    |    CHP    |    CMDP    |    CDTP      |
//! +--------------------------------------------------------------------+
//! |                         Transport Layer                            |
//! |  UDP beacon  |  framed TCP req/rep, pub/sub, push/pull, poller     |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Satellite`] | The runtime every satellite process embeds |
//! | [`satellite::SatelliteHandler`] | User behaviour behind the lifecycle |
//! | [`Controller`] | Discovers satellites and fans out commands |
//! | [`data::DataSender`] / [`data::DataReceiver`] | CDTP producer/consumer |
//! | [`monitoring::MonitoringListener`] | Log + metric subscriber |

/// CHIRP beacon: discovery socket, service table, callbacks.
pub mod beacon;
/// Scoped configuration with used-key tracking.
pub mod config;
/// Controller composition layer (fan-out, aggregate state).
pub mod controller;
/// CDTP data plane (producer, consumer framework).
pub mod data;
/// Error types.
pub mod error;
/// Lifecycle state machine.
pub mod fsm;
/// CHP heartbeat sender and liveness checker.
pub mod heartbeat;
/// CMDP monitoring pipeline (logs, metrics, listener).
pub mod monitoring;
/// Wire protocols (envelope, CHIRP, CSCP, CHP, CMDP, CDTP).
pub mod protocol;
/// The satellite runtime (command dispatch, transitions, run worker).
pub mod satellite;
/// Framed message transport over TCP.
pub mod transport;

pub use beacon::{BroadcastManager, DiscoveredService};
pub use config::Configuration;
pub use controller::{CommandTransmitter, Controller};
pub use error::{Error, Result};
pub use fsm::{State, TransitionVerb};
pub use protocol::{name_uuid, ServiceKind};
pub use satellite::{CancellationToken, CommandRegistry, Satellite, SatelliteOptions};

/// Framework version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
