// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CSCP command registry and dispatch.
//!
//! Dispatch order: decode (INVALID on failure), case-folded verb lookup
//! (UNKNOWN when nobody answers to it), guard predicate (INVALID when it
//! refuses), then the handler — argument-type mismatches reply INCOMPLETE,
//! refused lifecycle transitions INVALID, anything else raised inside a
//! handler ERROR with the printable form. Lifecycle verbs reply before
//! their handler runs: acceptance enters the transitional state and queues
//! the work.

use std::collections::BTreeMap;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::fsm::{Accepted, State, TransitionVerb};
use crate::protocol::pack::{MetaMap, Value};
use crate::protocol::{CscpReply, CscpRequest, ReplyVerb};

use super::{SatelliteHandler, Shared, Task};

/// What a user command handler returns.
pub struct CommandReturn {
    pub message: String,
    pub payload: Option<Value>,
    pub meta: MetaMap,
}

impl CommandReturn {
    pub fn message(message: impl Into<String>) -> Self {
        CommandReturn {
            message: message.into(),
            payload: None,
            meta: MetaMap::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

pub type CommandHandler = Box<dyn Fn(Option<&Value>) -> Result<CommandReturn> + Send + Sync>;
pub type CommandGuard = Box<dyn Fn(State) -> bool + Send + Sync>;

struct CommandEntry {
    summary: String,
    guard: Option<CommandGuard>,
    handler: CommandHandler,
}

/// Explicitly registered user commands, enumerated by `get_commands`.
#[derive(Default)]
pub struct CommandRegistry {
    entries: BTreeMap<String, CommandEntry>,
}

/// Verbs owned by the runtime; user commands cannot shadow them.
const RESERVED: [&str; 9] = [
    "get_commands",
    "get_class",
    "get_name",
    "get_state",
    "get_status",
    "get_config",
    "get_run_id",
    "get_version",
    "shutdown",
];

fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name) || TransitionVerb::parse(name).is_some()
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command; the summary's first line shows up in
    /// `get_commands`.
    pub fn add_command(
        &mut self,
        name: &str,
        summary: &str,
        handler: CommandHandler,
    ) -> Result<()> {
        self.insert(name, summary, None, handler)
    }

    /// Register a command with a guard predicate deciding admissibility
    /// from the current state.
    pub fn add_guarded_command(
        &mut self,
        name: &str,
        summary: &str,
        guard: CommandGuard,
        handler: CommandHandler,
    ) -> Result<()> {
        self.insert(name, summary, Some(guard), handler)
    }

    fn insert(
        &mut self,
        name: &str,
        summary: &str,
        guard: Option<CommandGuard>,
        handler: CommandHandler,
    ) -> Result<()> {
        let name = name.to_lowercase();
        if is_reserved(&name) {
            return Err(Error::InvalidState {
                reason: format!("'{}' is a reserved command", name),
            });
        }
        self.entries.insert(
            name,
            CommandEntry {
                summary: summary.lines().next().unwrap_or("").to_string(),
                guard,
                handler,
            },
        );
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.entries.get(name)
    }

    fn summaries(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter().map(|(k, v)| (k, &v.summary))
    }
}

/// Handle one decoded request; always produces a reply.
pub(crate) fn dispatch<H: SatelliteHandler>(shared: &Shared<H>, request: &CscpRequest) -> CscpReply {
    let verb = request.verb.as_str();

    if let Some(transition) = TransitionVerb::parse(verb) {
        return handle_transition(shared, transition, request.payload.as_ref());
    }

    match verb {
        "get_commands" => {
            let mut commands: Vec<(String, String)> = Vec::new();
            for name in RESERVED {
                commands.push((name.to_string(), builtin_summary(name).to_string()));
            }
            for v in TransitionVerb::ALL {
                commands.push((v.label().to_string(), format!("Lifecycle verb '{}'.", v.label())));
            }
            for (name, summary) in shared.registry.summaries() {
                commands.push((name.clone(), summary.clone()));
            }
            let payload = Value::Map(
                commands
                    .iter()
                    .map(|(k, v)| (Value::from(k.as_str()), Value::from(v.as_str())))
                    .collect(),
            );
            CscpReply::new(
                &shared.name,
                ReplyVerb::Success,
                format!("{} commands known", commands.len()),
            )
            .with_payload(payload)
        }
        "get_class" => CscpReply::new(&shared.name, ReplyVerb::Success, shared.class_name.clone()),
        "get_name" => CscpReply::new(&shared.name, ReplyVerb::Success, shared.name.clone()),
        "get_state" => {
            let state = shared.fsm.state();
            CscpReply::new(&shared.name, ReplyVerb::Success, state.label())
                .with_payload(Value::from(state as u8))
        }
        "get_status" => CscpReply::new(&shared.name, ReplyVerb::Success, shared.fsm.status()),
        "get_config" => {
            let applied = shared.config.lock().applied();
            let payload = Value::Map(
                applied
                    .iter()
                    .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                    .collect(),
            );
            CscpReply::new(
                &shared.name,
                ReplyVerb::Success,
                format!("{} applied configuration values", applied.len()),
            )
            .with_payload(payload)
        }
        "get_run_id" => {
            CscpReply::new(&shared.name, ReplyVerb::Success, shared.run_id.lock().clone())
        }
        "get_version" => CscpReply::new(&shared.name, ReplyVerb::Success, crate::VERSION),
        "shutdown" => handle_shutdown(shared),
        _ => handle_user_command(shared, verb, request.payload.as_ref()),
    }
}

fn builtin_summary(name: &str) -> &'static str {
    match name {
        "get_commands" => "Return all commands supported by the satellite.",
        "get_class" => "Return the class of the satellite.",
        "get_name" => "Return the canonical name of the satellite.",
        "get_state" => "Return the current lifecycle state.",
        "get_status" => "Return the last status message.",
        "get_config" => "Return the applied configuration values.",
        "get_run_id" => "Return the identifier of the current or last run.",
        "get_version" => "Return the framework version.",
        "shutdown" => "Queue the satellite's reentry.",
        _ => "",
    }
}

fn handle_shutdown<H: SatelliteHandler>(shared: &Shared<H>) -> CscpReply {
    let state = shared.fsm.state();
    let allowed = matches!(
        state,
        State::New | State::Init | State::Safe | State::Error
    );
    if !allowed {
        return CscpReply::new(
            &shared.name,
            ReplyVerb::Invalid,
            format!("shutdown not allowed from state {}", state),
        );
    }
    // queued so pending transitions complete first
    let _ = shared.tasks.send(Task::Reentry);
    CscpReply::new(
        &shared.name,
        ReplyVerb::Success,
        format!("{} queued for reentry", shared.name),
    )
}

/// Extract the run identifier from a `start` payload: a string, an
/// integer, or a map with a `run_id` entry.
fn run_id_from_payload(payload: Option<&Value>) -> Result<String> {
    match payload {
        Some(Value::String(s)) => s
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::protocol("run identifier is not valid utf-8")),
        Some(Value::Integer(i)) => Ok(i.to_string()),
        Some(Value::Map(entries)) => entries
            .iter()
            .find(|(k, _)| k.as_str() == Some("run_id"))
            .map(|(_, v)| run_id_from_payload(Some(v)))
            .unwrap_or_else(|| Err(Error::protocol("start payload is missing 'run_id'"))),
        _ => Err(Error::protocol("start requires a run identifier payload")),
    }
}

fn handle_transition<H: SatelliteHandler>(
    shared: &Shared<H>,
    verb: TransitionVerb,
    payload: Option<&Value>,
) -> CscpReply {
    // argument validation first: a bad payload must not move the state
    let task_payload = match verb {
        TransitionVerb::Initialize | TransitionVerb::Reconfigure => {
            if let Err(e) = Configuration::from_payload(payload) {
                return CscpReply::new(
                    &shared.name,
                    ReplyVerb::Incomplete,
                    format!("wrong argument: {}", e),
                );
            }
            payload.cloned()
        }
        TransitionVerb::Start => match run_id_from_payload(payload) {
            Ok(run_id) => Some(Value::from(run_id.as_str())),
            Err(e) => {
                return CscpReply::new(
                    &shared.name,
                    ReplyVerb::Incomplete,
                    format!("wrong argument: {}", e),
                )
            }
        },
        _ => None,
    };

    if verb == TransitionVerb::Reconfigure && !shared.supports_reconfigure {
        return CscpReply::new(
            &shared.name,
            ReplyVerb::NotImplemented,
            "satellite does not support reconfigure",
        );
    }

    match shared.fsm.begin(verb) {
        Ok(Accepted::Transitional(transitional)) => {
            let _ = shared.tasks.send(Task::Transition {
                verb,
                transitional,
                payload: task_payload,
            });
            CscpReply::new(
                &shared.name,
                ReplyVerb::Success,
                format!("transition {} initiated, now {}", verb.label(), transitional),
            )
        }
        Ok(Accepted::Direct(state)) => {
            if verb == TransitionVerb::Failure {
                let _ = shared.tasks.send(Task::Failure);
            }
            CscpReply::new(
                &shared.name,
                ReplyVerb::Success,
                format!("transition {} complete, now {}", verb.label(), state),
            )
        }
        Err(e) => CscpReply::new(&shared.name, ReplyVerb::Invalid, e.to_string()),
    }
}

fn handle_user_command<H: SatelliteHandler>(
    shared: &Shared<H>,
    verb: &str,
    payload: Option<&Value>,
) -> CscpReply {
    let Some(entry) = shared.registry.get(verb) else {
        log::error!("[CSCP] unknown command: {}", verb);
        return CscpReply::new(
            &shared.name,
            ReplyVerb::Unknown,
            format!("unknown command: {}", verb),
        );
    };

    if let Some(guard) = &entry.guard {
        if !guard(shared.fsm.state()) {
            log::error!("[CSCP] command not allowed: {}", verb);
            return CscpReply::new(
                &shared.name,
                ReplyVerb::Invalid,
                format!("not allowed: {}", verb),
            );
        }
    }

    match (entry.handler)(payload) {
        Ok(ret) => {
            let mut reply = CscpReply::new(&shared.name, ReplyVerb::Success, ret.message);
            if let Some(payload) = ret.payload {
                reply = reply.with_payload(payload);
            }
            reply.with_meta(ret.meta)
        }
        Err(Error::InvalidTransition { .. }) | Err(Error::InvalidState { .. }) => {
            CscpReply::new(&shared.name, ReplyVerb::Invalid, format!("not allowed: {}", verb))
        }
        Err(e @ Error::Config { .. }) => CscpReply::new(
            &shared.name,
            ReplyVerb::Incomplete,
            format!("wrong argument: {}", e),
        ),
        Err(e) => {
            log::error!("[CSCP] command '{}' failed: {}", verb, e);
            CscpReply::new(&shared.name, ReplyVerb::Error, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names_rejected() {
        let mut registry = CommandRegistry::new();
        let handler = || -> CommandHandler { Box::new(|_| Ok(CommandReturn::message("ok"))) };
        assert!(registry.add_command("get_state", "x", handler()).is_err());
        assert!(registry.add_command("Initialize", "x", handler()).is_err());
        assert!(registry.add_command("read_adc", "x", handler()).is_ok());
    }

    #[test]
    fn test_run_id_extraction() {
        assert_eq!(
            run_id_from_payload(Some(&Value::from("r1"))).unwrap(),
            "r1"
        );
        assert_eq!(run_id_from_payload(Some(&Value::from(42u64))).unwrap(), "42");
        let map = Value::Map(vec![(Value::from("run_id"), Value::from("r7"))]);
        assert_eq!(run_id_from_payload(Some(&map)).unwrap(), "r7");
        assert!(run_id_from_payload(None).is_err());
        assert!(run_id_from_payload(Some(&Value::Boolean(true))).is_err());
    }
}
