//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_requests_total` (counter): requests by endpoint, status, backend
//! - `router_request_duration_seconds` (histogram): time until upstream headers
//! - `router_lease_acquisitions_total` (counter): by path (fast/slow)
//! - `router_backend_in_flight` (gauge): leased slots per backend
//! - `router_backend_connect_failures_total` (counter): per backend

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// How a lease was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePath {
    /// Reserved immediately during the ranking scan.
    Fast,
    /// Obtained after waiting on every backend.
    Slow,
}

impl AcquirePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquirePath::Fast => "fast",
            AcquirePath::Slow => "slow",
        }
    }
}

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(endpoint: &str, status: u16, backend: &str, start: Instant) {
    ::metrics::counter!(
        "router_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    ::metrics::histogram!(
        "router_request_duration_seconds",
        "endpoint" => endpoint.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_lease_acquired(path: AcquirePath) {
    ::metrics::counter!("router_lease_acquisitions_total", "path" => path.as_str()).increment(1);
}

pub fn record_in_flight(backend: &str, in_flight: usize) {
    ::metrics::gauge!("router_backend_in_flight", "backend" => backend.to_string())
        .set(in_flight as f64);
}

pub fn record_connect_failure(backend: &str) {
    ::metrics::counter!(
        "router_backend_connect_failures_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}
