//! Shared application plumbing for floodswarm control surfaces.

use std::sync::{Arc, Mutex};

use floodswarm_core::MissionState;

/// Mission state shared between the clock thread and control surfaces.
pub type SharedMission = Arc<Mutex<MissionState>>;

pub mod command;
pub mod runner;
pub mod sinks;

pub use command::{
    CommandReceiver, CommandSender, CommandSubmit, create_command_bus, drain_pending_commands,
    make_command_submit,
};
pub use runner::{MissionRunner, RunnerOptions};
pub use sinks::{TracingGuidance, TracingRender};
