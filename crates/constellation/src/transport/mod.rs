// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framed message transport over TCP.
//!
//! All four stream protocols ride on the same framing: a 5-byte header per
//! frame, a MORE flag chaining frames into atomic multi-frame messages.
//!
//! ```text
//! +----------------+-----------+-------------------+
//! | Length (4B BE) | Flags (1B)| Payload           |
//! +----------------+-----------+-------------------+
//! ```
//!
//! Socket roles mirror the protocol topology:
//!
//! - [`ReplySocket`] / [`RequestSocket`] — strict request/reply for CSCP;
//!   the satellite binds and serves one controller connection at a time.
//! - [`PubSocket`] / [`SubSocket`] — broadcast fan-out for CHP and CMDP;
//!   subscribers apply topic-prefix filters on receive.
//! - [`PushSocket`] — bound producer stream for CDTP, round-robin across
//!   connected consumers, blocking-send backpressure.
//! - [`StreamPoller`] / [`FramedStream`] — mio readiness multiplexing for
//!   consumers that watch many connections with one poll timeout.

pub mod framing;
mod poller;
mod pubsub;
mod push;
mod reply;
mod request;

pub use framing::{MessageDecoder, DEFAULT_MAX_FRAME_SIZE, FLAG_MORE, FRAME_HEADER_SIZE};
pub use poller::{FramedStream, PollEvent, StreamPoller};
pub use pubsub::{PubSocket, SubSocket};
pub use push::PushSocket;
pub use reply::ReplySocket;
pub use request::RequestSocket;

use std::net::TcpListener;

use crate::error::{Error, Result};

/// One transport message: a list of frames delivered atomically.
pub type Message = Vec<Vec<u8>>;

/// Resolve a bind interface string (`*` means all interfaces) and port
/// (0 requests an ephemeral bind) into a listening socket plus the port
/// actually bound.
pub(crate) fn bind_tcp(interface: &str, port: u16) -> Result<(TcpListener, u16)> {
    let host = if interface == "*" { "0.0.0.0" } else { interface };
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).map_err(|e| Error::BindFailed {
        addr: addr.clone(),
        reason: e.to_string(),
    })?;
    let bound = listener
        .local_addr()
        .map_err(|e| Error::BindFailed {
            addr,
            reason: e.to_string(),
        })?
        .port();
    Ok((listener, bound))
}
