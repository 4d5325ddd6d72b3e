use std::sync::{Arc, Mutex};

use floodswarm_core::{
    GuidanceSink, MissionConfig, MissionEvent, MissionPersistence, MissionState, NullRender,
    Position, RunPhase, Tick, TickSummary,
};

#[derive(Default)]
struct SpyLog {
    events: Vec<(Tick, MissionEvent)>,
    summaries: Vec<TickSummary>,
}

#[derive(Clone, Default)]
struct SpyPersistence {
    log: Arc<Mutex<SpyLog>>,
}

impl MissionPersistence for SpyPersistence {
    fn on_event(&mut self, tick: Tick, event: &MissionEvent) {
        if let Ok(mut log) = self.log.lock() {
            log.events.push((tick, event.clone()));
        }
    }

    fn on_tick(&mut self, summary: &TickSummary) {
        if let Ok(mut log) = self.log.lock() {
            log.summaries.push(summary.clone());
        }
    }
}

#[derive(Clone, Default)]
struct SpyGuidance {
    messages: Arc<Mutex<Vec<String>>>,
}

impl GuidanceSink for SpyGuidance {
    fn announce(&mut self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_owned());
        }
    }
}

fn seeded_config() -> MissionConfig {
    MissionConfig {
        flood_center: Some(Position::new(500.0, -250.0)),
        rng_seed: Some(0xD05E_5C0E),
        ..MissionConfig::default()
    }
}

#[test]
fn full_mission_routes_every_event_through_the_sinks() {
    let persistence = SpyPersistence::default();
    let guidance = SpyGuidance::default();
    let mut state = MissionState::with_sinks(
        seeded_config(),
        Box::new(persistence.clone()),
        Box::new(guidance.clone()),
        Box::new(NullRender),
    )
    .expect("state");

    state.launch().expect("launch");
    let detected = state.total_detected();

    let mut ticks = 0u64;
    loop {
        let report = state.step();
        ticks += 1;
        if report.complete {
            break;
        }
        assert!(ticks < 20_000, "mission failed to terminate");
    }

    assert_eq!(state.phase(), RunPhase::Complete);
    assert_eq!(state.total_rescued(), detected);

    let log = persistence.log.lock().expect("log");

    let detections = log
        .events
        .iter()
        .filter(|(_, event)| matches!(event, MissionEvent::Detection { .. }))
        .count();
    assert_eq!(detections, detected);

    let rescues: Vec<_> = log
        .events
        .iter()
        .filter_map(|(_, event)| match event {
            MissionEvent::Rescue(rescue) => Some(rescue),
            _ => None,
        })
        .collect();
    assert_eq!(rescues.len(), detected);

    // At-most-once routing: no victim appears in two rescue events.
    for (i, rescue) in rescues.iter().enumerate() {
        assert!(
            rescues[i + 1..].iter().all(|other| other.victim != rescue.victim),
            "victim routed twice"
        );
        assert!(rescue.distance <= state.config().trigger_range);
    }

    let completions = log
        .events
        .iter()
        .filter(|(_, event)| matches!(event, MissionEvent::MissionComplete(_)))
        .count();
    assert_eq!(completions, 1);

    // One region per drone, assigned at launch (tick zero).
    let regions = log
        .events
        .iter()
        .filter(|(tick, event)| {
            *tick == Tick::zero() && matches!(event, MissionEvent::RegionAssigned { .. })
        })
        .count();
    assert_eq!(regions, state.drones().count());

    // Tick summaries arrive in order with monotone rescue totals.
    let mut last_tick = Tick::zero();
    let mut last_rescued = 0usize;
    for summary in &log.summaries {
        assert_eq!(summary.tick, last_tick.next());
        assert!(summary.rescued_total >= last_rescued);
        assert_eq!(summary.remaining, detected - summary.rescued_total);
        last_tick = summary.tick;
        last_rescued = summary.rescued_total;
    }

    let messages = guidance.messages.lock().expect("messages");
    assert_eq!(messages.len(), detected, "one guidance call per rescue");
}

#[test]
fn relaunch_replaces_the_victim_set_wholesale() {
    let mut state = MissionState::new(seeded_config()).expect("state");
    state.launch().expect("launch");
    let first: Vec<Position> = state.victims().map(|(_, victim)| victim.position).collect();

    state.launch().expect("relaunch");
    let second: Vec<Position> = state.victims().map(|(_, victim)| victim.position).collect();

    assert!(!second.is_empty());
    assert_ne!(first, second, "detection must replace, not accumulate");
    assert_eq!(state.total_rescued(), 0);
    assert_eq!(state.tick(), Tick::zero());
}
