// ABOUTME: Prometheus metrics for the event pipeline, command intake, API calls and scheduler
// ABOUTME: Recording is a no-op until init_metrics installs the global recorder

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const EVENTS_RECEIVED: &str = "burrow_events_received_total";
pub const EVENTS_DROPPED: &str = "burrow_events_dropped_total";
pub const COMMANDS: &str = "burrow_commands_total";
pub const API_CALLS: &str = "burrow_api_calls_total";
pub const CONNECTED_BOTS: &str = "burrow_connected_bots";
pub const TASKS_FIRED: &str = "burrow_scheduled_tasks_fired_total";
pub const TASK_PANICS: &str = "burrow_task_panics_total";

/// Installs the Prometheus recorder. Call once per process.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

pub fn record_event_received(kind: &str) {
    ::metrics::counter!(EVENTS_RECEIVED, "kind" => kind.to_string()).increment(1);
}

/// An undrained ring slot was overwritten.
pub fn record_event_dropped() {
    ::metrics::counter!(EVENTS_DROPPED).increment(1);
}

/// `outcome` is one of `ok`, `cooldown`, `denied`, `unknown`, `overflow`.
pub fn record_command(outcome: &'static str) {
    ::metrics::counter!(COMMANDS, "outcome" => outcome).increment(1);
}

pub fn record_api_call(action: &str, outcome: &'static str) {
    ::metrics::counter!(API_CALLS, "action" => action.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn set_connected_bots(count: usize) {
    ::metrics::gauge!(CONNECTED_BOTS).set(count as f64);
}

pub fn record_task_fired(action: &'static str) {
    ::metrics::counter!(TASKS_FIRED, "action" => action).increment(1);
}

pub fn record_task_panic() {
    ::metrics::counter!(TASK_PANICS).increment(1);
}
