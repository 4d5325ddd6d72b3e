//! The simulation clock: a fixed-period thread driving the tick pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::SharedMission;
use crate::command::{CommandReceiver, drain_pending_commands};

/// Runner behaviour knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerOptions {
    /// Run ticks back-to-back without sleeping.
    pub headless: bool,
    /// Halt the clock once this tick count is reached.
    pub max_ticks: Option<u64>,
}

/// Fixed-period scheduler sequencing allocation, motion/rescue, and the
/// termination check through `MissionState::step`.
///
/// `start` is idempotent; `stop` halts future ticks without rolling back
/// the tick in flight.
pub struct MissionRunner {
    shared: SharedMission,
    receiver: Arc<CommandReceiver>,
    options: RunnerOptions,
    halt: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MissionRunner {
    #[must_use]
    pub fn new(shared: SharedMission, receiver: CommandReceiver, options: RunnerOptions) -> Self {
        Self {
            shared,
            receiver: Arc::new(receiver),
            options,
            halt: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Begin scheduling ticks. A no-op when the clock is already running.
    pub fn start(&mut self) {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.halt.store(false, Ordering::Relaxed);

        let shared = Arc::clone(&self.shared);
        let receiver = Arc::clone(&self.receiver);
        let halt = Arc::clone(&self.halt);
        let options = self.options;

        let spawned = thread::Builder::new()
            .name("floodswarm-clock".into())
            .spawn(move || run_loop(&shared, &receiver, &halt, options));
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => warn!(%err, "failed to spawn clock thread"),
        }
    }

    /// Halt future ticks and wait for the clock thread to exit.
    pub fn stop(&mut self) {
        self.halt.store(true, Ordering::Relaxed);
        self.join();
    }

    /// Wait for the clock to finish naturally (completion or tick cap).
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Whether the clock thread is currently alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for MissionRunner {
    fn drop(&mut self) {
        self.halt.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(
    shared: &SharedMission,
    receiver: &CommandReceiver,
    halt: &AtomicBool,
    options: RunnerOptions,
) {
    loop {
        if halt.load(Ordering::Relaxed) {
            info!("clock halted");
            return;
        }

        let (report, period) = {
            let Ok(mut state) = shared.lock() else {
                warn!("mission state lock poisoned; clock exiting");
                return;
            };
            drain_pending_commands(receiver, &mut state);
            // The tick body runs to completion under the lock, so reset
            // and pause can only land between ticks.
            let report = state.step();
            (report, Duration::from_millis(state.config().tick_interval_ms))
        };

        if report.complete {
            info!(tick = report.tick.0, "clock stopped: mission complete");
            return;
        }
        if options.max_ticks.is_some_and(|cap| report.tick.0 >= cap) {
            info!(tick = report.tick.0, "clock stopped: tick cap reached");
            return;
        }
        if !options.headless {
            thread::sleep(period);
        }
    }
}
