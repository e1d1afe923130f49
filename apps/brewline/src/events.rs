//! # Tracing Event Emitter
//!
//! Publishes engine events as structured log lines. Dashboards tail the
//! `brewline::events` target.

use brewline_core::{BrewlineEvent, EventEmitter};

/// Emitter that writes every event to `tracing` at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: &BrewlineEvent) -> Result<(), String> {
        let payload = serde_json::to_string(event).map_err(|e| e.to_string())?;
        tracing::info!(target: "brewline::events", event = event.name(), %payload);
        Ok(())
    }
}
