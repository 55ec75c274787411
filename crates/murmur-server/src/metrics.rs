//! Metrics collection and export for murmur.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "murmur_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "murmur_connections_active";
    pub const FRAMES_TOTAL: &str = "murmur_frames_total";
    pub const FRAMES_BYTES: &str = "murmur_frames_bytes";
    pub const EVENTS_TOTAL: &str = "murmur_events_total";
    pub const DELIVERIES_TOTAL: &str = "murmur_deliveries_total";
    pub const USERS_ONLINE: &str = "murmur_users_online";
    pub const USERS_REGISTERED: &str = "murmur_users_registered";
    pub const LATENCY_SECONDS: &str = "murmur_latency_seconds";
    pub const ERRORS_TOTAL: &str = "murmur_errors_total";
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
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of WebSocket frames");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of WebSocket frames");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound events handled, by name");
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Outbound events delivered, by name");
    metrics::describe_gauge!(names::USERS_ONLINE, "Users currently online");
    metrics::describe_gauge!(names::USERS_REGISTERED, "Users registered since start");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Event handling latency in seconds"
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
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

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

/// Record a WebSocket frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a handled inbound event.
pub fn record_event(event: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => event).increment(1);
}

/// Record an outbound event handed to a connection.
pub fn record_delivery(event: &'static str) {
    counter!(names::DELIVERIES_TOTAL, "event" => event).increment(1);
}

/// Update user gauges.
pub fn set_users(online: usize, registered: usize) {
    gauge!(names::USERS_ONLINE).set(online as f64);
    gauge!(names::USERS_REGISTERED).set(registered as f64);
}

/// Record event handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        let _guard = ConnectionMetricsGuard::new();
        record_event("login");
        record_delivery("users-update");
        set_users(1, 2);
    }
}
