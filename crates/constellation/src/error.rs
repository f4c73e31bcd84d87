// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the Constellation runtime.
//!
//! One crate-wide enum keeps the failure taxonomy in a single place:
//! protocol decode failures drop the offending frame, transition refusals
//! turn into `INVALID` replies, everything raised inside user handlers is
//! folded into an `ERROR` state with the printable form as status. Errors
//! never cross thread boundaries as live objects.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Constellation runtime error.
#[derive(Debug)]
pub enum Error {
    /// Malformed envelope, wrong magic, unknown protocol tag. The frame is
    /// dropped; the connection stays open.
    Protocol { reason: String },

    /// Verb not admissible from the current state. No state change.
    InvalidTransition { verb: String, state: &'static str },

    /// Missing or malformed configuration value.
    Config { key: String, reason: String },

    /// Failure raised inside a user transition or run handler.
    Handler { reason: String },

    /// Heartbeat miss threshold exceeded for a tracked peer.
    PeerFailure { name: String },

    /// Underlying socket error.
    Io(io::Error),

    /// Failed to bind a service socket.
    BindFailed { addr: String, reason: String },

    /// Send on a closed or stalled connection failed.
    SendFailed { reason: String },

    /// Operation not valid in the current runtime state (e.g. DAT before
    /// BOR on a sender).
    InvalidState { reason: String },

    /// A reply or join did not arrive within its deadline.
    Timeout { what: String },
}

impl Error {
    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Error::Protocol {
            reason: reason.into(),
        }
    }

    pub(crate) fn handler(reason: impl Into<String>) -> Self {
        Error::Handler {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol { reason } => write!(f, "protocol error: {}", reason),
            Error::InvalidTransition { verb, state } => {
                write!(f, "transition '{}' not allowed from state {}", verb, state)
            }
            Error::Config { key, reason } => {
                write!(f, "configuration error for '{}': {}", key, reason)
            }
            Error::Handler { reason } => write!(f, "handler failed: {}", reason),
            Error::PeerFailure { name } => write!(f, "peer '{}' failed heartbeat checks", name),
            Error::Io(e) => write!(f, "i/o error: {}", e),
            Error::BindFailed { addr, reason } => write!(f, "bind to {} failed: {}", addr, reason),
            Error::SendFailed { reason } => write!(f, "send failed: {}", reason),
            Error::InvalidState { reason } => write!(f, "invalid state: {}", reason),
            Error::Timeout { what } => write!(f, "timed out waiting for {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
