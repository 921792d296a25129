//! Metrics collection and export for Chime.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chime_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chime_connections_active";
    pub const HANDSHAKES_REJECTED: &str = "chime_handshakes_rejected_total";
    pub const WEBHOOK_JOBS: &str = "chime_webhook_jobs_total";
}

/// Describe server and core metrics.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::HANDSHAKES_REJECTED,
        "Upgrades refused, by reason (unauthorized, unavailable)"
    );
    metrics::describe_counter!(
        names::WEBHOOK_JOBS,
        "Webhook jobs by outcome (queued, dropped, delivered, failed)"
    );
    chime_core::metrics::describe();

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the recorder or its listener cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a refused upgrade.
pub fn record_rejected_handshake(reason: &'static str) {
    counter!(names::HANDSHAKES_REJECTED, "reason" => reason).increment(1);
}

/// Record a webhook job outcome.
pub fn record_webhook(outcome: &'static str) {
    counter!(names::WEBHOOK_JOBS, "outcome" => outcome).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
