//! Tracing-backed boundary sinks.
//!
//! The real map client and audio playback live outside this process;
//! these sinks surface the same payloads on the log instead.

use floodswarm_core::{GuidanceSink, RenderSink, RenderUpdate};
use tracing::{debug, info};

/// Guidance messages routed to the log in place of audio playback.
#[derive(Debug, Default)]
pub struct TracingGuidance;

impl GuidanceSink for TracingGuidance {
    fn announce(&mut self, message: &str) {
        info!(target: "floodswarm::guidance", "{message}");
    }
}

/// Render updates surfaced at debug level for headless runs.
#[derive(Debug, Default)]
pub struct TracingRender;

impl RenderSink for TracingRender {
    fn apply(&mut self, update: &RenderUpdate) {
        match update {
            RenderUpdate::RegionPolygon { drone, polygon } => {
                debug!(target: "floodswarm::render", ?drone, vertices = polygon.vertices().len(), "region polygon");
            }
            other => debug!(target: "floodswarm::render", update = ?other, "render update"),
        }
    }
}
