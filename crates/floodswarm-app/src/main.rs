use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use floodswarm_app::{
    MissionRunner, RunnerOptions, SharedMission, TracingGuidance, TracingRender,
    create_command_bus, make_command_submit,
};
use floodswarm_core::{
    MissionCommand, MissionConfig, MissionPersistence, MissionState, MissionSummary,
    NullPersistence,
};
use floodswarm_geo::Position;
use floodswarm_storage::{Storage, StoragePipeline};
use tracing::info;

/// Flood-rescue drone swarm simulation.
#[derive(Debug, Parser)]
#[command(name = "floodswarm", version, about)]
struct Args {
    /// Flood center easting, meters.
    #[arg(long, default_value_t = 0.0)]
    center_x: f64,
    /// Flood center northing, meters.
    #[arg(long, default_value_t = 0.0)]
    center_y: f64,
    /// Flood disc radius, meters.
    #[arg(long, default_value_t = 800.0)]
    radius: f64,
    /// Victim count hint for the detection generator.
    #[arg(long, default_value_t = 12.0)]
    density: f64,
    /// Number of drones (1-10).
    #[arg(long, default_value_t = 3)]
    drones: u32,
    /// Rescue trigger range, meters.
    #[arg(long, default_value_t = 40.0)]
    trigger_range: f64,
    /// Tick interval, milliseconds.
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,
    /// RNG seed for reproducible missions.
    #[arg(long)]
    seed: Option<u64>,
    /// Run ticks back-to-back without sleeping.
    #[arg(long)]
    headless: bool,
    /// Halt after this many ticks even if victims remain.
    #[arg(long)]
    max_ticks: Option<u64>,
    /// DuckDB telemetry path; telemetry is disabled when absent.
    #[arg(long)]
    db: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = MissionConfig {
        drone_count: args.drones,
        detection_density: args.density,
        flood_center: Some(Position::new(args.center_x, args.center_y)),
        flood_radius: args.radius,
        trigger_range: args.trigger_range,
        tick_interval_ms: args.tick_ms,
        rng_seed: args.seed,
        ..MissionConfig::default()
    };

    let (persistence, storage): (Box<dyn MissionPersistence>, Option<Arc<Mutex<Storage>>>) =
        match &args.db {
            Some(path) => {
                let pipeline =
                    StoragePipeline::new(path).with_context(|| format!("open telemetry db {path}"))?;
                let storage = pipeline.storage();
                (Box::new(pipeline), Some(storage))
            }
            None => (Box::new(NullPersistence), None),
        };

    let state = MissionState::with_sinks(
        config,
        persistence,
        Box::new(TracingGuidance),
        Box::new(TracingRender),
    )?;
    let shared: SharedMission = Arc::new(Mutex::new(state));

    let (sender, receiver) = create_command_bus(16);
    let submit = make_command_submit(sender);
    submit(MissionCommand::Launch);

    let mut runner = MissionRunner::new(
        Arc::clone(&shared),
        receiver,
        RunnerOptions {
            headless: args.headless,
            max_ticks: args.max_ticks,
        },
    );
    runner.start();
    runner.join();
    drop(runner);

    let state = Arc::try_unwrap(shared)
        .map_err(|_| anyhow::anyhow!("mission state still shared after clock shutdown"))?
        .into_inner()
        .map_err(|_| anyhow::anyhow!("mission state lock poisoned"))?;
    info!(tick = state.tick().0, phase = ?state.phase(), "mission finished");
    let summary = state.mission_summary();
    // Dropping the state tears down the telemetry pipeline, which joins
    // the writer thread after a final flush.
    drop(state);

    report_summary(&summary, storage.as_ref())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn report_summary(summary: &MissionSummary, storage: Option<&Arc<Mutex<Storage>>>) -> Result<()> {
    info!(
        detected = summary.total_detected,
        rescued = summary.total_rescued,
        "final summary"
    );
    for tally in &summary.tallies {
        info!(team = %tally.team, rescued = tally.rescued, "drone tally");
    }

    if let Some(storage) = storage {
        let mut guard = storage
            .lock()
            .map_err(|_| anyhow::anyhow!("storage lock poisoned"))?;
        let detections = guard.detection_count()?;
        let rescues = guard.rescue_count()?;
        info!(detections, rescues, "telemetry recorded");
    }
    Ok(())
}
