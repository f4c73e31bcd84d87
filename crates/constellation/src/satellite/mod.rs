// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The satellite runtime.
//!
//! One satellite process hosts the five concurrent subsystems:
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Satellite                              |
//! |  +----------------+  +-----------------+  +---------------+  |
//! |  | beacon listener|  | command         |  | transition    |  |
//! |  | (CHIRP worker) |  | responder       |  | worker (FIFO) |  |
//! |  +----------------+  +-----------------+  +---------------+  |
//! |  +----------------+  +-----------------+  +---------------+  |
//! |  | heartbeat      |  | monitoring      |  | run worker    |  |
//! |  | sender+checker |  | publisher       |  | (cancellable) |  |
//! |  +----------------+  +-----------------+  +---------------+  |
//! +--------------------------------------------------------------+
//! ```
//!
//! Commands that request a lifecycle transition enter the transitional
//! state immediately, reply "accepted", and queue the handler onto the
//! single transition worker (strict FIFO). The `do_run` handler is the
//! exception: it executes on its own thread and observes a cancellation
//! token that `stop`/`interrupt` fire; a run worker ignoring the token past
//! the grace period forces ERROR.

mod commands;
mod token;

pub use commands::{CommandGuard, CommandHandler, CommandRegistry, CommandReturn};
pub use token::CancellationToken;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::beacon::BroadcastManager;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::fsm::{Accepted, Fsm, State, TransitionVerb};
use crate::heartbeat::{HeartbeatChecker, HeartbeatSender};
use crate::monitoring::MonitoringSender;
use crate::protocol::pack::Value;
use crate::protocol::{CscpReply, CscpRequest, ReplyVerb, ServiceKind};
use crate::transport::ReplySocket;

/// How long the transition worker waits for the run worker to honour its
/// cancellation token before forcing ERROR. Generous enough for a data
/// receiver's post-run drain (4 s) plus handler teardown.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// User-provided behaviour behind the lifecycle transitions. Every
/// transition handler returns a status string or fails the transition.
pub trait SatelliteHandler: Send + 'static {
    /// Class name reported by `get_class`.
    fn class_name(&self) -> &'static str {
        "Satellite"
    }

    /// Apply configuration. Keys left unread are reported as unused.
    fn do_initializing(&mut self, config: &mut Configuration) -> Result<String>;

    fn do_launching(&mut self) -> Result<String> {
        Ok("launched".into())
    }

    fn do_landing(&mut self) -> Result<String> {
        Ok("landed".into())
    }

    /// Prepare a run; the identifier comes from the `start` payload.
    fn do_starting(&mut self, run_id: &str) -> Result<String> {
        Ok(format!("starting run {}", run_id))
    }

    /// The run itself, on a dedicated worker thread. Must return within
    /// the grace period once the token fires.
    fn do_run(&mut self, token: &CancellationToken) -> Result<String> {
        while !token.wait_timeout(Duration::from_millis(100)) {}
        Ok("run finished".into())
    }

    fn do_stopping(&mut self) -> Result<String> {
        Ok("stopped".into())
    }

    /// Move shared resources to a safe configuration. The runtime stops an
    /// active run before calling this.
    fn do_interrupting(&mut self) -> Result<String> {
        Ok("interrupted".into())
    }

    /// Whether `reconfigure` is supported; `do_reconfiguring` is only
    /// called when this returns true.
    fn supports_reconfigure(&self) -> bool {
        false
    }

    fn do_reconfiguring(&mut self, _partial: &mut Configuration) -> Result<String> {
        Err(Error::handler("reconfigure not supported"))
    }

    /// Called after the satellite entered ERROR.
    fn on_failure(&mut self) {}
}

/// Startup options shared by every satellite role.
#[derive(Debug, Clone)]
pub struct SatelliteOptions {
    pub name: String,
    pub group: String,
    pub interface: String,
    pub cmd_port: u16,
    pub hb_port: u16,
    pub mon_port: u16,
}

impl SatelliteOptions {
    pub fn new(name: &str, group: &str) -> Self {
        SatelliteOptions {
            name: name.to_string(),
            group: group.to_string(),
            interface: "*".to_string(),
            cmd_port: 0,
            hb_port: 0,
            mon_port: 0,
        }
    }
}

pub(crate) enum Task {
    Transition {
        verb: TransitionVerb,
        transitional: State,
        payload: Option<Value>,
    },
    /// `failure` verb: state is already ERROR, stop the run worker and run
    /// the failure hook.
    Failure,
    Reentry,
}

#[derive(Default)]
pub(crate) struct RunControl {
    token: Mutex<Option<CancellationToken>>,
    done: Mutex<Option<Receiver<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// State shared by the satellite's workers.
pub(crate) struct Shared<H: SatelliteHandler> {
    pub name: String,
    pub class_name: String,
    pub fsm: Fsm,
    pub config: Mutex<Configuration>,
    pub run_id: Mutex<String>,
    pub handler: Mutex<H>,
    pub registry: CommandRegistry,
    pub tasks: Sender<Task>,
    pub run: RunControl,
    pub supports_reconfigure: bool,
    pub stop: Arc<AtomicBool>,
    pub transport_errors: Arc<AtomicU64>,
}

/// A satellite: bind with [`Satellite::new`], register commands and
/// metrics, then [`Satellite::run`] until a `shutdown` verb arrives.
pub struct Satellite<H: SatelliteHandler> {
    options: SatelliteOptions,
    handler: H,
    registry: CommandRegistry,
    reply: ReplySocket,
    heartbeat: HeartbeatSender,
    monitoring: Arc<MonitoringSender>,
    beacon: Arc<BroadcastManager>,
}

impl<H: SatelliteHandler> Satellite<H> {
    pub fn new(options: SatelliteOptions, handler: H) -> Result<Self> {
        let reply = ReplySocket::bind(&options.interface, options.cmd_port)?;
        log::info!(
            "[CSCP] satellite {} listening on command port {}",
            options.name,
            reply.port()
        );
        let heartbeat = HeartbeatSender::bind(&options.name, &options.interface, options.hb_port)?;
        let monitoring = Arc::new(MonitoringSender::bind(
            &options.name,
            &options.interface,
            options.mon_port,
        )?);
        let beacon = BroadcastManager::new(&options.name, &options.group, &options.interface)?;
        Ok(Satellite {
            options,
            handler,
            registry: CommandRegistry::new(),
            reply,
            heartbeat,
            monitoring,
            beacon,
        })
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn cmd_port(&self) -> u16 {
        self.reply.port()
    }

    pub fn beacon(&self) -> &Arc<BroadcastManager> {
        &self.beacon
    }

    pub fn monitoring(&self) -> &Arc<MonitoringSender> {
        &self.monitoring
    }

    /// Register user commands before `run`.
    pub fn registry(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    /// Serve until shutdown. Returns after DEAD for a clean exit code.
    pub fn run(self) -> Result<()> {
        let Satellite {
            options,
            handler,
            registry,
            mut reply,
            heartbeat,
            monitoring,
            beacon,
        } = self;

        monitoring.attach_logging();
        beacon.register_service(ServiceKind::Control, reply.port());
        beacon.register_service(ServiceKind::Heartbeat, heartbeat.port());
        beacon.register_service(ServiceKind::Monitoring, monitoring.port());
        beacon.start();

        let (task_tx, task_rx) = unbounded();
        let shared = Arc::new(Shared {
            name: options.name.clone(),
            class_name: handler.class_name().to_string(),
            fsm: Fsm::new(),
            config: Mutex::new(Configuration::new()),
            run_id: Mutex::new(String::new()),
            supports_reconfigure: handler.supports_reconfigure(),
            handler: Mutex::new(handler),
            registry,
            tasks: task_tx,
            run: RunControl::default(),
            stop: Arc::new(AtomicBool::new(false)),
            transport_errors: Arc::new(AtomicU64::new(0)),
        });

        // repeated socket failures surface as a rate on the monitoring path
        {
            let counter = Arc::clone(&shared.transport_errors);
            monitoring.schedule_metric(
                "transport_errors",
                "",
                crate::protocol::MetricsType::Rate,
                Duration::from_secs(10),
                Box::new(move || {
                    Ok(Value::from(counter.load(Ordering::Relaxed)))
                }),
            );
        }

        // peer liveness: track every HEARTBEAT service in the group and
        // demote to SAFE when one fails while we are in ORBIT/RUN
        let checker = HeartbeatChecker::new()?;
        {
            let checker = Arc::clone(&checker);
            beacon.register_callback(
                ServiceKind::Heartbeat,
                Box::new(move |service| {
                    let addr = std::net::SocketAddr::new(service.address, service.port);
                    if service.alive {
                        if let Err(e) = checker.add_peer(addr) {
                            log::warn!("[CHP] cannot track {}: {}", addr, e);
                        }
                    } else {
                        checker.remove_peer(addr);
                    }
                }),
            );
        }
        {
            let shared = Arc::clone(&shared);
            checker.on_failure(Box::new(move |name| {
                let state = shared.fsm.state();
                if matches!(state, State::Orbit | State::Run) {
                    let failure = Error::PeerFailure {
                        name: name.to_string(),
                    };
                    log::error!("[CHP] {}, interrupting to SAFE", failure);
                    if let Ok(Accepted::Transitional(transitional)) =
                        shared.fsm.begin(TransitionVerb::Interrupt)
                    {
                        let _ = shared.tasks.send(Task::Transition {
                            verb: TransitionVerb::Interrupt,
                            transitional,
                            payload: None,
                        });
                    }
                }
            }));
        }

        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        {
            let shared = Arc::clone(&shared);
            workers.push(spawn_named("cscp-responder", move || {
                responder_loop(&shared, &mut reply);
            }));
        }
        {
            let shared = Arc::clone(&shared);
            workers.push(spawn_named("fsm-worker", move || {
                transition_loop(&shared, &task_rx);
            }));
        }
        {
            let shared = Arc::clone(&shared);
            workers.push(spawn_named("chp-sender", move || {
                heartbeat.run(&shared.fsm, &shared.stop);
            }));
        }
        {
            let shared = Arc::clone(&shared);
            let monitoring = Arc::clone(&monitoring);
            workers.push(spawn_named("cmdp-publisher", move || {
                monitoring.run(&shared.stop);
            }));
        }
        {
            let shared = Arc::clone(&shared);
            let checker = Arc::clone(&checker);
            workers.push(spawn_named("chp-checker", move || {
                checker.run(&shared.stop);
            }));
        }

        // park until the transition worker executes the reentry
        while !shared.stop.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));
        }

        beacon.shutdown();
        for worker in workers {
            let _ = worker.join();
        }
        log::info!("[CSCP] satellite {} departed", options.name);
        Ok(())
    }
}

fn spawn_named(name: &str, f: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .expect("spawn worker thread")
}

fn responder_loop<H: SatelliteHandler>(shared: &Shared<H>, reply: &mut ReplySocket) {
    while !shared.stop.load(Ordering::Relaxed) {
        match reply.poll_request(Duration::from_millis(100)) {
            Ok(Some(frames)) => {
                let response = match CscpRequest::decode(&frames) {
                    Ok(request) => {
                        log::debug!("[CSCP] request '{}'", request.verb);
                        commands::dispatch(shared, &request)
                    }
                    Err(e) => {
                        log::error!("[CSCP] malformed request: {}", e);
                        CscpReply::new(&shared.name, ReplyVerb::Invalid, e.to_string())
                    }
                };
                match response.encode() {
                    Ok(frames) => {
                        if let Err(e) = reply.send_reply(&frames) {
                            log::warn!("[CSCP] reply failed: {}", e);
                        }
                    }
                    Err(e) => log::error!("[CSCP] reply encode failed: {}", e),
                }
            }
            Ok(None) => {}
            Err(e) => {
                // socket trouble: back off briefly and resume
                log::error!("[CSCP] responder error: {}", e);
                shared.transport_errors.fetch_add(1, Ordering::Relaxed);
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    }
}

fn transition_loop<H: SatelliteHandler>(shared: &Arc<Shared<H>>, tasks: &Receiver<Task>) {
    loop {
        match tasks.recv_timeout(Duration::from_millis(100)) {
            Ok(Task::Transition {
                verb,
                transitional,
                payload,
            }) => execute_transition(shared, verb, transitional, payload),
            Ok(Task::Failure) => {
                if stop_run(shared, STOP_GRACE).is_err() {
                    log::error!("[FSM] run worker ignored cancellation after failure");
                }
                if let Some(mut handler) = shared.handler.try_lock_for(Duration::from_secs(1)) {
                    handler.on_failure();
                }
            }
            Ok(Task::Reentry) => {
                let _ = stop_run(shared, STOP_GRACE);
                shared.fsm.reentry();
                shared.stop.store(true, Ordering::Relaxed);
                break;
            }
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                if shared.stop.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn execute_transition<H: SatelliteHandler>(
    shared: &Arc<Shared<H>>,
    verb: TransitionVerb,
    transitional: State,
    payload: Option<Value>,
) {
    let result: Result<String> = match transitional {
        State::Initializing => initialize(shared, payload.as_ref()),
        State::Launching => shared.handler.lock().do_launching(),
        State::Landing => shared.handler.lock().do_landing(),
        State::Starting => {
            let run_id = payload
                .as_ref()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            *shared.run_id.lock() = run_id.clone();
            shared.handler.lock().do_starting(&run_id)
        }
        State::Stopping => stop_run(shared, STOP_GRACE)
            .and_then(|()| shared.handler.lock().do_stopping()),
        State::Interrupting => stop_run(shared, STOP_GRACE)
            .and_then(|()| shared.handler.lock().do_interrupting()),
        State::Reconfiguring => reconfigure(shared, payload.as_ref()),
        other => {
            log::error!("[FSM] no handler for transitional state {}", other);
            return;
        }
    };

    match result {
        Ok(status) => {
            shared.fsm.complete(transitional, status);
            if transitional == State::Starting {
                spawn_run(shared);
            }
        }
        Err(e) => {
            let text = format!("{} failed: {}", verb.label(), e);
            shared.fsm.fail(text);
            if let Some(mut handler) = shared.handler.try_lock_for(Duration::from_secs(1)) {
                handler.on_failure();
            }
        }
    }
}

fn initialize<H: SatelliteHandler>(
    shared: &Arc<Shared<H>>,
    payload: Option<&Value>,
) -> Result<String> {
    let mut config = Configuration::from_payload(payload)?;
    let status = shared.handler.lock().do_initializing(&mut config)?;
    let unused = config.unused_keys();
    let status = if unused.is_empty() {
        status
    } else {
        log::warn!("[FSM] unused configuration keys: {}", unused.join(", "));
        format!("{} (unused configuration keys: {})", status, unused.join(", "))
    };
    *shared.config.lock() = config;
    Ok(status)
}

fn reconfigure<H: SatelliteHandler>(
    shared: &Arc<Shared<H>>,
    payload: Option<&Value>,
) -> Result<String> {
    let mut partial = Configuration::from_payload(payload)?;
    let status = shared.handler.lock().do_reconfiguring(&mut partial)?;
    shared.config.lock().absorb(partial);
    Ok(status)
}

/// Fire the cancellation token and wait out the grace period.
fn stop_run<H: SatelliteHandler>(shared: &Shared<H>, grace: Duration) -> Result<()> {
    let Some(token) = shared.run.token.lock().take() else {
        return Ok(());
    };
    token.cancel();
    let done = shared.run.done.lock().take();
    if let Some(done) = done {
        if done.recv_timeout(grace).is_err() {
            return Err(Error::Timeout {
                what: "run worker exit".into(),
            });
        }
    }
    if let Some(handle) = shared.run.handle.lock().take() {
        let _ = handle.join();
    }
    Ok(())
}

/// Launch the run worker after `starting` completed into RUN.
fn spawn_run<H: SatelliteHandler>(shared: &Arc<Shared<H>>) {
    let token = CancellationToken::new();
    let (done_tx, done_rx) = bounded(1);
    *shared.run.token.lock() = Some(token.clone());
    *shared.run.done.lock() = Some(done_rx);

    let worker_shared = Arc::clone(shared);
    let handle = spawn_named("run-worker", move || {
        let result = {
            let mut handler = worker_shared.handler.lock();
            handler.do_run(&token)
        };
        match result {
            Ok(status) => {
                log::info!("[FSM] run worker finished: {}", status);
                worker_shared.fsm.set_status(status);
            }
            Err(e) => {
                // exceptions never cross the thread boundary: the run
                // worker's failures force ERROR right here
                if !token.is_cancelled() {
                    worker_shared.fsm.fail(format!("run failed: {}", e));
                    let _ = worker_shared.run.token.lock().take();
                    if let Some(mut handler) =
                        worker_shared.handler.try_lock_for(Duration::from_secs(1))
                    {
                        handler.on_failure();
                    }
                } else {
                    log::error!("[FSM] run worker failed during stop: {}", e);
                }
            }
        }
        let _ = done_tx.send(());
    });
    *shared.run.handle.lock() = Some(handle);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestHandler {
        fail_launch: bool,
        run_ignores_token: bool,
    }

    impl Default for TestHandler {
        fn default() -> Self {
            TestHandler {
                fail_launch: false,
                run_ignores_token: false,
            }
        }
    }

    impl SatelliteHandler for TestHandler {
        fn class_name(&self) -> &'static str {
            "TestHandler"
        }

        fn do_initializing(&mut self, config: &mut Configuration) -> Result<String> {
            let _ = config.get_u64_or("gain", 1)?;
            Ok("configured".into())
        }

        fn do_launching(&mut self) -> Result<String> {
            if self.fail_launch {
                Err(Error::handler("hardware absent"))
            } else {
                Ok("launched".into())
            }
        }

        fn do_run(&mut self, token: &CancellationToken) -> Result<String> {
            if self.run_ignores_token {
                std::thread::sleep(Duration::from_secs(3600));
            }
            while !token.wait_timeout(Duration::from_millis(20)) {}
            Ok("run finished".into())
        }
    }

    fn shared_with(handler: TestHandler) -> (Arc<Shared<TestHandler>>, Receiver<Task>) {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            name: "sat_test".into(),
            class_name: handler.class_name().into(),
            fsm: Fsm::new(),
            config: Mutex::new(Configuration::new()),
            run_id: Mutex::new(String::new()),
            supports_reconfigure: handler.supports_reconfigure(),
            handler: Mutex::new(handler),
            registry: CommandRegistry::new(),
            tasks: tx,
            run: RunControl::default(),
            stop: Arc::new(AtomicBool::new(false)),
            transport_errors: Arc::new(AtomicU64::new(0)),
        });
        (shared, rx)
    }

    fn drive(shared: &Arc<Shared<TestHandler>>, rx: &Receiver<Task>) {
        while let Ok(task) = rx.try_recv() {
            match task {
                Task::Transition {
                    verb,
                    transitional,
                    payload,
                } => execute_transition(shared, verb, transitional, payload),
                Task::Failure => {}
                Task::Reentry => shared.fsm.reentry(),
            }
        }
    }

    fn request(verb: &str, payload: Option<Value>) -> CscpRequest {
        CscpRequest::new("ctl", verb, payload)
    }

    #[test]
    fn test_lifecycle_happy_path_through_dispatch() {
        let (shared, rx) = shared_with(TestHandler::default());

        let reply = commands::dispatch(&shared, &request("initialize", None));
        assert_eq!(reply.verb, ReplyVerb::Success);
        assert_eq!(shared.fsm.state(), State::Initializing);
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Init);

        let reply = commands::dispatch(&shared, &request("launch", None));
        assert_eq!(reply.verb, ReplyVerb::Success);
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Orbit);

        let reply =
            commands::dispatch(&shared, &request("start", Some(Value::from("r1"))));
        assert_eq!(reply.verb, ReplyVerb::Success);
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Run);
        assert_eq!(shared.run_id.lock().as_str(), "r1");

        let reply = commands::dispatch(&shared, &request("stop", None));
        assert_eq!(reply.verb, ReplyVerb::Success);
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Orbit);

        let reply = commands::dispatch(&shared, &request("land", None));
        assert_eq!(reply.verb, ReplyVerb::Success);
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Init);
    }

    #[test]
    fn test_invalid_transition_replies_invalid() {
        let (shared, _rx) = shared_with(TestHandler::default());
        let reply = commands::dispatch(&shared, &request("start", Some(Value::from("r1"))));
        assert_eq!(reply.verb, ReplyVerb::Invalid);
        assert!(reply.message.contains("not allowed"));
        assert_eq!(shared.fsm.state(), State::New);
    }

    #[test]
    fn test_unknown_verb() {
        let (shared, _rx) = shared_with(TestHandler::default());
        let reply = commands::dispatch(&shared, &request("warp_drive", None));
        assert_eq!(reply.verb, ReplyVerb::Unknown);
    }

    #[test]
    fn test_start_without_run_id_is_incomplete() {
        let (shared, rx) = shared_with(TestHandler::default());
        commands::dispatch(&shared, &request("initialize", None));
        drive(&shared, &rx);
        commands::dispatch(&shared, &request("launch", None));
        drive(&shared, &rx);

        let reply = commands::dispatch(&shared, &request("start", None));
        assert_eq!(reply.verb, ReplyVerb::Incomplete);
        assert_eq!(shared.fsm.state(), State::Orbit);
    }

    #[test]
    fn test_failed_transition_forces_error_with_status() {
        let (shared, rx) = shared_with(TestHandler {
            fail_launch: true,
            ..TestHandler::default()
        });
        commands::dispatch(&shared, &request("initialize", None));
        drive(&shared, &rx);
        commands::dispatch(&shared, &request("launch", None));
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Error);
        assert!(shared.fsm.status().contains("hardware absent"));

        // recovery only via initialize
        let reply = commands::dispatch(&shared, &request("launch", None));
        assert_eq!(reply.verb, ReplyVerb::Invalid);
        let reply = commands::dispatch(&shared, &request("initialize", None));
        assert_eq!(reply.verb, ReplyVerb::Success);
    }

    #[test]
    fn test_stop_grace_timeout_forces_error() {
        let (shared, rx) = shared_with(TestHandler {
            run_ignores_token: true,
            ..TestHandler::default()
        });
        commands::dispatch(&shared, &request("initialize", None));
        drive(&shared, &rx);
        commands::dispatch(&shared, &request("launch", None));
        drive(&shared, &rx);
        commands::dispatch(&shared, &request("start", Some(Value::from("r1"))));
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Run);

        commands::dispatch(&shared, &request("stop", None));
        // short grace for the test instead of the full four seconds
        if let Ok(Task::Transition { .. }) = rx.try_recv() {
            let result = stop_run(shared.as_ref(), Duration::from_millis(200));
            assert!(result.is_err());
            shared.fsm.fail("run worker did not stop");
        }
        assert_eq!(shared.fsm.state(), State::Error);
    }

    #[test]
    fn test_shutdown_gated_by_state() {
        let (shared, rx) = shared_with(TestHandler::default());
        let reply = commands::dispatch(&shared, &request("shutdown", None));
        assert_eq!(reply.verb, ReplyVerb::Success);
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Dead);
    }

    #[test]
    fn test_shutdown_refused_in_orbit() {
        let (shared, rx) = shared_with(TestHandler::default());
        commands::dispatch(&shared, &request("initialize", None));
        drive(&shared, &rx);
        commands::dispatch(&shared, &request("launch", None));
        drive(&shared, &rx);
        let reply = commands::dispatch(&shared, &request("shutdown", None));
        assert_eq!(reply.verb, ReplyVerb::Invalid);
        assert!(reply.message.contains("not allowed"));
    }

    #[test]
    fn test_get_state_and_status() {
        let (shared, rx) = shared_with(TestHandler::default());
        commands::dispatch(&shared, &request("initialize", None));
        drive(&shared, &rx);
        let reply = commands::dispatch(&shared, &request("get_state", None));
        assert_eq!(reply.message, "INIT");
        assert_eq!(reply.payload, Some(Value::from(State::Init as u8)));

        let reply = commands::dispatch(&shared, &request("GET_STATUS", None));
        assert_eq!(reply.verb, ReplyVerb::Success);
        assert_eq!(reply.message, "configured");
    }

    #[test]
    fn test_unused_config_keys_surface_in_status() {
        let (shared, rx) = shared_with(TestHandler::default());
        let payload = Value::Map(vec![
            (Value::from("gain"), Value::from(3u64)),
            (Value::from("unused_knob"), Value::from(9u64)),
        ]);
        commands::dispatch(&shared, &request("initialize", Some(payload)));
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Init);
        assert!(shared.fsm.status().contains("unused_knob"));
        assert!(shared.config.lock().applied().contains_key("gain"));
    }

    #[test]
    fn test_user_command_with_guard() {
        let mut registry = CommandRegistry::new();
        registry
            .add_guarded_command(
                "read_adc",
                "Read the ADC.",
                Box::new(|state| state == State::Orbit),
                Box::new(|_| {
                    Ok(CommandReturn::message("adc value").with_payload(Value::from(117u64)))
                }),
            )
            .unwrap();
        let (tx, rx) = unbounded();
        let handler = TestHandler::default();
        let shared = Arc::new(Shared {
            name: "sat_test".into(),
            class_name: "TestHandler".into(),
            fsm: Fsm::new(),
            config: Mutex::new(Configuration::new()),
            run_id: Mutex::new(String::new()),
            supports_reconfigure: false,
            handler: Mutex::new(handler),
            registry,
            tasks: tx,
            run: RunControl::default(),
            stop: Arc::new(AtomicBool::new(false)),
            transport_errors: Arc::new(AtomicU64::new(0)),
        });

        // guard refuses outside ORBIT
        let reply = commands::dispatch(&shared, &request("read_adc", None));
        assert_eq!(reply.verb, ReplyVerb::Invalid);

        commands::dispatch(&shared, &request("initialize", None));
        drive(&shared, &rx);
        commands::dispatch(&shared, &request("launch", None));
        drive(&shared, &rx);

        let reply = commands::dispatch(&shared, &request("read_adc", None));
        assert_eq!(reply.verb, ReplyVerb::Success);
        assert_eq!(reply.payload, Some(Value::from(117u64)));

        // reconfigure unsupported by this handler
        let reply = commands::dispatch(
            &shared,
            &request("reconfigure", Some(Value::Map(Vec::new()))),
        );
        assert_eq!(reply.verb, ReplyVerb::NotImplemented);
    }

    #[test]
    fn test_run_worker_spawns_and_stops() {
        let (shared, rx) = shared_with(TestHandler::default());
        commands::dispatch(&shared, &request("initialize", None));
        drive(&shared, &rx);
        commands::dispatch(&shared, &request("launch", None));
        drive(&shared, &rx);
        commands::dispatch(&shared, &request("start", Some(Value::from("r9"))));
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Run);
        assert!(shared.run.token.lock().is_some());

        commands::dispatch(&shared, &request("stop", None));
        drive(&shared, &rx);
        assert_eq!(shared.fsm.state(), State::Orbit);
        assert!(shared.run.token.lock().is_none());
    }
}
