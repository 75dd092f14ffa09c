//! Metrics collection and export for Scribe.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use scribe_core::{Hub, HubStats};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "scribe_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "scribe_connections_active";
    pub const PRESENCE_EVENTS_TOTAL: &str = "scribe_presence_events_total";
    pub const ROOMS_ACTIVE: &str = "scribe_rooms_active";
    pub const EVICTED_TOTAL: &str = "scribe_evicted_connections_total";
    pub const REJECTED_TOTAL: &str = "scribe_rejected_admissions_total";
    pub const ERRORS_TOTAL: &str = "scribe_errors_total";
}

/// Initialize the metrics system.
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
        names::PRESENCE_EVENTS_TOTAL,
        "Presence events fanned out to rooms"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Documents with at least one viewer");
    metrics::describe_counter!(
        names::EVICTED_TOTAL,
        "Connections dropped because their outbound queue was full or closed"
    );
    metrics::describe_counter!(
        names::REJECTED_TOTAL,
        "Websocket admissions refused before upgrade"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

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

/// Record an admission refused with the given HTTP status.
pub fn record_rejection(status: u16) {
    counter!(names::REJECTED_TOTAL, "status" => status.to_string()).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Publish a hub statistics snapshot.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    counter!(names::PRESENCE_EVENTS_TOTAL).absolute(stats.events_total);
    counter!(names::EVICTED_TOTAL).absolute(stats.evicted_total);
}

/// Publish hub statistics periodically.
pub async fn report_hub_stats(hub: Hub, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        record_hub_stats(&hub.stats().await);
    }
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
