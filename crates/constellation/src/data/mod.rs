// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CDTP data plane: producer and consumer building blocks.
//!
//! A producer ([`DataSender`]) binds its stream socket and owns the run's
//! sequence counter; consumers ([`DataReceiver`]) connect on receipt of a
//! DATA service offer and hand every decoded message to a [`RunWriter`].
//! Per producer and run the wire carries `BOR, DAT*, EOR` with contiguous
//! sequence numbers; receivers tolerate (and report) gaps and late joins
//! rather than dropping data.

mod receiver;
mod sender;

pub use receiver::{DataReceiver, RunWriter, SourceTable};
pub use sender::DataSender;

/// How long a receiver keeps draining after leaving RUN, to capture the
/// trailing EOR and in-flight data.
pub const DRAIN_GRACE: std::time::Duration = std::time::Duration::from_secs(4);

/// Poll timeout of the receiver loop.
pub const RECEIVE_POLL: std::time::Duration = std::time::Duration::from_millis(250);
