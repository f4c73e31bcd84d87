// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Full-stack lifecycle test: a satellite runtime driven by a controller
//! over real sockets.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use constellation::protocol::{ReplyVerb, Value};
use constellation::satellite::SatelliteHandler;
use constellation::{Configuration, Controller, Result, Satellite, SatelliteOptions, State};

struct Instrument;

impl SatelliteHandler for Instrument {
    fn class_name(&self) -> &'static str {
        "Instrument"
    }

    fn do_initializing(&mut self, config: &mut Configuration) -> Result<String> {
        let gain = config.get_u64_or("gain", 1)?;
        Ok(format!("gain {}", gain))
    }
}

fn wait_for_state(controller: &Controller, target: &str, expected: State) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let states = controller.states();
        if states.get(target).copied().flatten() == Some(expected) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "satellite never reached {} (currently {:?})",
            expected,
            states
        );
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_lifecycle_happy_path_and_invalid_verbs() {
    let options = SatelliteOptions {
        name: "sat_a".into(),
        group: "g_lifecycle_test".into(),
        interface: "127.0.0.1".into(),
        cmd_port: 0,
        hb_port: 0,
        mon_port: 0,
    };
    let satellite = Satellite::new(options, Instrument).expect("bind satellite");
    let cmd_port = satellite.cmd_port();
    let runtime = std::thread::spawn(move || satellite.run());

    let controller =
        Controller::new("ctl", "g_lifecycle_test", "127.0.0.1").expect("controller");
    let name = controller
        .add_peer(SocketAddr::from(([127, 0, 0, 1], cmd_port)))
        .expect("connect to satellite");
    assert_eq!(name, "sat_a");

    // from NEW, start is not admissible
    let replies = controller.command("start", None, Some(Value::from("r0")));
    let reply = replies["sat_a"].as_ref().expect("reply");
    assert_eq!(reply.verb, ReplyVerb::Invalid);
    assert!(reply.message.contains("not allowed"));

    // initialize -> INIT
    let payload = Value::Map(vec![(Value::from("gain"), Value::from(4u64))]);
    let replies = controller.command("initialize", None, Some(payload));
    assert_eq!(
        replies["sat_a"].as_ref().expect("reply").verb,
        ReplyVerb::Success
    );
    wait_for_state(&controller, "sat_a", State::Init);

    // status carries the handler's message
    let replies = controller.command("get_status", None, None);
    assert!(replies["sat_a"]
        .as_ref()
        .expect("reply")
        .message
        .contains("gain 4"));

    // launch -> ORBIT
    controller.command("launch", None, None);
    wait_for_state(&controller, "sat_a", State::Orbit);
    assert_eq!(controller.state(), Some(State::Orbit));

    // start r1 -> RUN
    let replies = controller.command("start", None, Some(Value::from("r1")));
    assert_eq!(
        replies["sat_a"].as_ref().expect("reply").verb,
        ReplyVerb::Success
    );
    wait_for_state(&controller, "sat_a", State::Run);

    let replies = controller.command("get_run_id", None, None);
    assert_eq!(replies["sat_a"].as_ref().expect("reply").message, "r1");

    // stop -> ORBIT, land -> INIT
    controller.command("stop", None, None);
    wait_for_state(&controller, "sat_a", State::Orbit);
    controller.command("land", None, None);
    wait_for_state(&controller, "sat_a", State::Init);

    // shutdown: the runtime returns cleanly
    let replies = controller.command("shutdown", None, None);
    assert_eq!(
        replies["sat_a"].as_ref().expect("reply").verb,
        ReplyVerb::Success
    );
    runtime.join().expect("runtime thread").expect("clean exit");
    controller.shutdown();
}
