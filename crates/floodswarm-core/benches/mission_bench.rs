use criterion::{Criterion, criterion_group, criterion_main};
use floodswarm_core::{MissionConfig, MissionState, Position};

fn bench_step(c: &mut Criterion) {
    // A dense, slow mission keeps the allocator and motion stages busy
    // for the whole measurement window.
    let config = MissionConfig {
        drone_count: 10,
        detection_density: 200.0,
        flood_center: Some(Position::new(0.0, 0.0)),
        flood_radius: 2_000.0,
        drone_speed: 0.5,
        rng_seed: Some(42),
        ..MissionConfig::default()
    };
    let mut state = MissionState::new(config).expect("state");
    state.launch().expect("launch");

    c.bench_function("mission_step", |b| {
        b.iter(|| state.step());
    });
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
