// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Satellite lifecycle state machine.
//!
//! Stable states gate the admissible transition verbs; accepting a verb
//! moves to the paired transitional state immediately (so the command reply
//! can carry it), and the queued handler completes the transition to the
//! next stable state or fails to ERROR. While transitional, the only
//! admissible verb is `failure`.
//!
//! ```text
//!  NEW --initialize--> initializing --> INIT --launch--> launching --> ORBIT
//!  ORBIT --start--> starting --> RUN --stop--> stopping --> ORBIT
//!  ORBIT --land--> landing --> INIT        ORBIT/RUN --interrupt--> SAFE
//!  SAFE --recover--> INIT     SAFE/ERROR --initialize--> initializing
//!  any --failure--> ERROR     INIT --shutdown--> DEAD
//! ```
//!
//! Reads are lock-free snapshots (heartbeat sender, command guards); writes
//! are serialised by one lock held by the transition worker and the run
//! worker at its exit.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Lifecycle states with their on-wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    New = 0x10,
    Initializing = 0x12,
    Init = 0x20,
    Launching = 0x23,
    Orbit = 0x30,
    Landing = 0x32,
    Reconfiguring = 0x33,
    Starting = 0x34,
    Run = 0x40,
    Stopping = 0x43,
    Interrupting = 0xE3,
    Safe = 0xE0,
    Error = 0xF0,
    Dead = 0xFF,
}

impl State {
    /// Display name; stable states are uppercase, transitional lowercase.
    pub fn label(self) -> &'static str {
        match self {
            State::New => "NEW",
            State::Initializing => "initializing",
            State::Init => "INIT",
            State::Launching => "launching",
            State::Orbit => "ORBIT",
            State::Landing => "landing",
            State::Reconfiguring => "reconfiguring",
            State::Starting => "starting",
            State::Run => "RUN",
            State::Stopping => "stopping",
            State::Interrupting => "interrupting",
            State::Safe => "SAFE",
            State::Error => "ERROR",
            State::Dead => "DEAD",
        }
    }

    pub fn is_steady(self) -> bool {
        matches!(
            self,
            State::New
                | State::Init
                | State::Orbit
                | State::Run
                | State::Safe
                | State::Error
                | State::Dead
        )
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0x10 => State::New,
            0x12 => State::Initializing,
            0x20 => State::Init,
            0x23 => State::Launching,
            0x30 => State::Orbit,
            0x32 => State::Landing,
            0x33 => State::Reconfiguring,
            0x34 => State::Starting,
            0x40 => State::Run,
            0x43 => State::Stopping,
            0xE3 => State::Interrupting,
            0xE0 => State::Safe,
            0xF0 => State::Error,
            0xFF => State::Dead,
            other => {
                return Err(Error::protocol(format!(
                    "unknown state code {:#04x}",
                    other
                )))
            }
        })
    }

    pub fn parse(label: &str) -> Result<Self> {
        for state in [
            State::New,
            State::Initializing,
            State::Init,
            State::Launching,
            State::Orbit,
            State::Landing,
            State::Reconfiguring,
            State::Starting,
            State::Run,
            State::Stopping,
            State::Interrupting,
            State::Safe,
            State::Error,
            State::Dead,
        ] {
            if state.label().eq_ignore_ascii_case(label) {
                return Ok(state);
            }
        }
        Err(Error::protocol(format!("unknown state '{}'", label)))
    }

    /// Rank used by the controller's aggregate view.
    pub fn severity(self) -> u8 {
        match self {
            State::Error => 8,
            s if !s.is_steady() => 7,
            State::Run => 6,
            State::Orbit => 5,
            State::Safe => 4,
            State::Init => 3,
            State::New => 2,
            State::Dead => 1,
            _ => unreachable!("all states covered"),
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle transition verbs (`shutdown` is handled by the command layer,
/// not a state transition until DEAD).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionVerb {
    Initialize,
    Launch,
    Land,
    Start,
    Stop,
    Reconfigure,
    Interrupt,
    Recover,
    Failure,
}

impl TransitionVerb {
    pub const ALL: [TransitionVerb; 9] = [
        TransitionVerb::Initialize,
        TransitionVerb::Launch,
        TransitionVerb::Land,
        TransitionVerb::Start,
        TransitionVerb::Stop,
        TransitionVerb::Reconfigure,
        TransitionVerb::Interrupt,
        TransitionVerb::Recover,
        TransitionVerb::Failure,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TransitionVerb::Initialize => "initialize",
            TransitionVerb::Launch => "launch",
            TransitionVerb::Land => "land",
            TransitionVerb::Start => "start",
            TransitionVerb::Stop => "stop",
            TransitionVerb::Reconfigure => "reconfigure",
            TransitionVerb::Interrupt => "interrupt",
            TransitionVerb::Recover => "recover",
            TransitionVerb::Failure => "failure",
        }
    }

    pub fn parse(verb: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.label() == verb)
    }
}

/// Outcome of accepting a verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Entered the transitional state; the paired handler must run.
    Transitional(State),
    /// Moved directly to a stable state (recover, failure).
    Direct(State),
}

/// Stable state a completed transitional state lands in.
pub fn steady_after(transitional: State) -> State {
    match transitional {
        State::Initializing => State::Init,
        State::Launching => State::Orbit,
        State::Landing => State::Init,
        State::Starting => State::Run,
        State::Stopping => State::Orbit,
        State::Reconfiguring => State::Orbit,
        State::Interrupting => State::Safe,
        other => other,
    }
}

fn admissible(state: State, verb: TransitionVerb) -> Option<Accepted> {
    use Accepted::{Direct, Transitional};
    use TransitionVerb as V;
    match (state, verb) {
        (_, V::Failure) => Some(Direct(State::Error)),
        (State::New, V::Initialize) => Some(Transitional(State::Initializing)),
        (State::Init, V::Initialize) => Some(Transitional(State::Initializing)),
        (State::Init, V::Launch) => Some(Transitional(State::Launching)),
        (State::Orbit, V::Reconfigure) => Some(Transitional(State::Reconfiguring)),
        (State::Orbit, V::Land) => Some(Transitional(State::Landing)),
        (State::Orbit, V::Start) => Some(Transitional(State::Starting)),
        (State::Orbit, V::Interrupt) => Some(Transitional(State::Interrupting)),
        (State::Run, V::Stop) => Some(Transitional(State::Stopping)),
        (State::Run, V::Interrupt) => Some(Transitional(State::Interrupting)),
        (State::Safe, V::Recover) => Some(Direct(State::Init)),
        (State::Safe, V::Initialize) => Some(Transitional(State::Initializing)),
        (State::Error, V::Initialize) => Some(Transitional(State::Initializing)),
        _ => None,
    }
}

/// The state machine. One per satellite.
pub struct Fsm {
    current: ArcSwap<State>,
    status: Mutex<String>,
    transitioned: AtomicBool,
    write_lock: Mutex<()>,
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

impl Fsm {
    pub fn new() -> Self {
        Fsm {
            current: ArcSwap::from_pointee(State::New),
            status: Mutex::new(String::from("just launched")),
            transitioned: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Lock-free state snapshot.
    pub fn state(&self) -> State {
        **self.current.load()
    }

    pub fn status(&self) -> String {
        self.status.lock().clone()
    }

    pub fn set_status(&self, status: impl Into<String>) {
        *self.status.lock() = status.into();
    }

    /// Consume the state-change flag (heartbeat sender).
    pub fn take_transitioned(&self) -> bool {
        self.transitioned.swap(false, Ordering::Relaxed)
    }

    fn store(&self, state: State) {
        self.current.store(Arc::new(state));
        self.transitioned.store(true, Ordering::Relaxed);
    }

    /// Accept a verb: enter the transitional (or direct target) state, or
    /// refuse with `InvalidTransition` and no state change.
    pub fn begin(&self, verb: TransitionVerb) -> Result<Accepted> {
        let _guard = self.write_lock.lock();
        let current = self.state();
        if !current.is_steady() && verb != TransitionVerb::Failure {
            return Err(Error::InvalidTransition {
                verb: verb.label().into(),
                state: current.label(),
            });
        }
        if current == State::Dead {
            return Err(Error::InvalidTransition {
                verb: verb.label().into(),
                state: current.label(),
            });
        }
        match admissible(current, verb) {
            Some(accepted) => {
                let next = match accepted {
                    Accepted::Transitional(s) | Accepted::Direct(s) => s,
                };
                log::info!("[FSM] {} -> {} ({})", current, next, verb.label());
                self.store(next);
                Ok(accepted)
            }
            None => Err(Error::InvalidTransition {
                verb: verb.label().into(),
                state: current.label(),
            }),
        }
    }

    /// Complete the current transitional state into its paired stable state.
    pub fn complete(&self, transitional: State, status: impl Into<String>) {
        let _guard = self.write_lock.lock();
        let steady = steady_after(transitional);
        log::info!("[FSM] {} -> {}", transitional, steady);
        self.store(steady);
        *self.status.lock() = status.into();
    }

    /// Force ERROR, recording the failure text as status.
    pub fn fail(&self, status: impl Into<String>) {
        let _guard = self.write_lock.lock();
        let status = status.into();
        log::error!("[FSM] {} -> ERROR: {}", self.state(), status);
        self.store(State::Error);
        *self.status.lock() = status;
    }

    /// Terminal transition used by `shutdown`.
    pub fn reentry(&self) {
        let _guard = self.write_lock.lock();
        self.store(State::Dead);
        *self.status.lock() = String::from("departed");
    }
}
