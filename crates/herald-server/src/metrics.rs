//! Metrics collection and export for Herald.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use herald_core::{active_sessions, HubStats};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "herald_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "herald_connections_active";
    pub const SESSIONS_ACTIVE: &str = "herald_sessions_active";
    pub const MESSAGES_PUBLISHED: &str = "herald_messages_published_total";
    pub const MESSAGES_BYTES: &str = "herald_messages_bytes_total";
    pub const TOPICS_ACTIVE: &str = "herald_topics_active";
    pub const TOPICS_DORMANT: &str = "herald_topics_dormant";
    pub const PUBLISH_REJECTED: &str = "herald_publish_rejected_total";
    pub const ERRORS_TOTAL: &str = "herald_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of websocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of websocket connections"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of running sessions");
    metrics::describe_counter!(names::MESSAGES_PUBLISHED, "Total number of published messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of published message bodies");
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Topics currently serving a channel");
    metrics::describe_gauge!(names::TOPICS_DORMANT, "Topics parked for reuse");
    metrics::describe_counter!(
        names::PUBLISH_REJECTED,
        "Publish requests rejected, by reason"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a published message.
pub fn record_publish(bytes: usize, via: &'static str) {
    counter!(names::MESSAGES_PUBLISHED, "via" => via).increment(1);
    counter!(names::MESSAGES_BYTES, "via" => via).increment(bytes as u64);
}

/// Record a rejected publish request.
pub fn record_rejected(reason: &'static str) {
    counter!(names::PUBLISH_REJECTED, "reason" => reason).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Refresh gauges that mirror hub and session state.
pub fn record_state(stats: HubStats) {
    gauge!(names::SESSIONS_ACTIVE).set(active_sessions() as f64);
    gauge!(names::TOPICS_ACTIVE).set(stats.active_topics as f64);
    gauge!(names::TOPICS_DORMANT).set(stats.dormant_topics as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
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
        record_disconnection();
    }
}
