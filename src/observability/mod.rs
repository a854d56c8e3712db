//! Logging and metrics bootstrap.
//!
//! Subsystems emit through the `tracing` and `metrics` facades; this module
//! wires the facades to real sinks at startup. Metric names are registered
//! here once so the Prometheus endpoint carries help text.

use crate::core::error::{GatewayError, GatewayResult};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Start the Prometheus exporter on its own listener and register metric
/// descriptions.
pub fn install_metrics_exporter(addr: &str) -> GatewayResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|_| GatewayError::config(format!("invalid metrics address: {addr}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| GatewayError::config(format!("metrics exporter: {err}")))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!("gateway_requests_total", "Total requests processed.");
    describe_counter!(
        "gateway_rate_limited_total",
        "Requests rejected by the rate limiter."
    );
    describe_counter!(
        "gateway_circuit_rejections_total",
        "Backend picks rejected by an open circuit."
    );
    describe_counter!(
        "gateway_no_backend_total",
        "Requests that exhausted every backend candidate."
    );
    describe_gauge!(
        "gateway_backend_healthy",
        "Whether a backend is healthy (1) or not (0)."
    );
    describe_gauge!(
        "gateway_circuit_state",
        "Circuit breaker state: 0=closed, 1=open, 2=half-open."
    );
    describe_histogram!(
        "gateway_upstream_duration_seconds",
        "Forwarded request duration in seconds."
    );
}
