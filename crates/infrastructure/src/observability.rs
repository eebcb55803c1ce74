//! Metrics collection for the scheduler and tribe subsystems.
//!
//! Handles are resolved through the `metrics` macros on every call so that
//! a collector created before the exporter is installed still reports.

use std::net::SocketAddr;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, error, info};

/// Metrics collector shared by the task manager and the tribe manager
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    // Task metrics

    /// Record a finished fire of a task workflow
    pub fn record_fire(&self, outcome: &'static str, duration_seconds: f64) {
        counter!("pulse_task_fires_total", "outcome" => outcome).increment(1);
        histogram!("pulse_task_fire_duration_seconds").record(duration_seconds);

        debug!(
            outcome = outcome,
            duration_seconds = duration_seconds,
            "Task fire recorded"
        );
    }

    /// Record a fire that came due while the previous one was still running
    pub fn record_fire_skipped(&self) {
        counter!("pulse_task_fires_total", "outcome" => "skipped").increment(1);
    }

    pub fn record_state_change(&self, from: &'static str, to: &'static str) {
        counter!("pulse_task_state_transitions_total", "from" => from, "to" => to).increment(1);
    }

    pub fn update_task_count(&self, count: usize) {
        gauge!("pulse_tasks").set(count as f64);
    }

    // Tribe metrics

    /// Record one gossip exchange with a peer
    pub fn record_gossip_exchange(&self, outcome: &'static str, duration_seconds: f64) {
        counter!("pulse_gossip_exchanges_total", "outcome" => outcome).increment(1);
        histogram!("pulse_gossip_exchange_duration_seconds").record(duration_seconds);
    }

    pub fn record_events_applied(&self, count: usize) {
        counter!("pulse_gossip_events_applied_total").increment(count as u64);
    }

    pub fn record_divergence(&self, reason: &'static str) {
        counter!("pulse_tribe_divergence_total", "reason" => reason).increment(1);
    }

    pub fn update_member_count(&self, status: &'static str, count: usize) {
        gauge!("pulse_tribe_members", "status" => status).set(count as f64);
    }
}

/// Install the Prometheus recorder and serve it over HTTP
pub fn init_metrics_exporter(bind_address: SocketAddr) -> Result<()> {
    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(bind_address)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create Prometheus exporter: {e}"))?;

    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("Failed to set global recorder: {e}"))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!(error = ?e, "Prometheus exporter stopped");
        }
    });

    info!(%bind_address, "Prometheus metrics exporter listening");
    Ok(())
}
