use std::sync::{Arc, Mutex};
use std::time::Duration;

use floodswarm_app::{
    MissionRunner, RunnerOptions, SharedMission, create_command_bus, drain_pending_commands,
    make_command_submit,
};
use floodswarm_core::{MissionCommand, MissionConfig, MissionState, RunPhase};
use floodswarm_geo::Position;

fn seeded_config() -> MissionConfig {
    MissionConfig {
        flood_center: Some(Position::new(0.0, 0.0)),
        rng_seed: Some(0xC10C_05),
        ..MissionConfig::default()
    }
}

#[test]
fn command_bus_applies_commands_between_ticks() {
    let (sender, receiver) = create_command_bus(8);
    let submit = make_command_submit(sender);
    let mut state = MissionState::new(seeded_config()).expect("state");

    assert!(submit(MissionCommand::Launch));
    assert!(submit(MissionCommand::Pause));
    drain_pending_commands(&receiver, &mut state);
    assert_eq!(state.phase(), RunPhase::Paused);
    assert!(state.total_detected() > 0);

    assert!(submit(MissionCommand::Reset));
    drain_pending_commands(&receiver, &mut state);
    assert_eq!(state.phase(), RunPhase::Idle);
    assert_eq!(state.total_detected(), 0);
}

#[test]
fn headless_clock_runs_a_mission_to_completion() {
    let shared: SharedMission =
        Arc::new(Mutex::new(MissionState::new(seeded_config()).expect("state")));
    let (sender, receiver) = create_command_bus(8);
    let submit = make_command_submit(sender);
    submit(MissionCommand::Launch);

    let mut runner = MissionRunner::new(
        Arc::clone(&shared),
        receiver,
        RunnerOptions {
            headless: true,
            max_ticks: Some(20_000),
        },
    );
    runner.start();
    // A second start while the clock is alive is a no-op.
    runner.start();
    runner.join();

    let state = shared.lock().expect("state lock");
    assert_eq!(state.phase(), RunPhase::Complete);
    assert_eq!(state.total_rescued(), state.total_detected());
}

#[test]
fn stop_halts_future_ticks_without_completing() {
    let config = MissionConfig {
        drone_speed: 0.1,
        trigger_range: 1.0,
        tick_interval_ms: 1,
        ..seeded_config()
    };
    let shared: SharedMission = Arc::new(Mutex::new(MissionState::new(config).expect("state")));
    let (sender, receiver) = create_command_bus(8);
    let submit = make_command_submit(sender);
    submit(MissionCommand::Launch);

    let mut runner = MissionRunner::new(Arc::clone(&shared), receiver, RunnerOptions::default());
    runner.start();
    std::thread::sleep(Duration::from_millis(50));
    runner.stop();
    assert!(!runner.is_running());

    let tick_at_stop = shared.lock().expect("state lock").tick();
    std::thread::sleep(Duration::from_millis(20));
    let tick_after = shared.lock().expect("state lock").tick();
    assert_eq!(tick_at_stop, tick_after, "no ticks after stop");
    assert_eq!(shared.lock().expect("state lock").phase(), RunPhase::Running);
}
