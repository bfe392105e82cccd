//! Metrics collection and exposition.
//!
//! # Metrics
//! - `acme_proxy_forward_total` (counter): forwarded requests by method, status
//! - `acme_proxy_forward_duration_seconds` (histogram): upstream round-trip latency
//! - `acme_proxy_forward_errors_total` (counter): failed forwards by error kind
//! - `acme_proxy_issuance_total` (counter): issuances by outcome
//! - `acme_proxy_poll_timeouts_total` (counter): exhausted polls by stage

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with its own HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_forward(method: &str, status: u16, start_time: Instant) {
    ::metrics::counter!(
        "acme_proxy_forward_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("acme_proxy_forward_duration_seconds", "method" => method.to_string())
        .record(start_time.elapsed().as_secs_f64());
}

pub fn record_forward_error(kind: &'static str) {
    ::metrics::counter!("acme_proxy_forward_errors_total", "kind" => kind).increment(1);
}

pub fn record_issuance(outcome: &'static str) {
    ::metrics::counter!("acme_proxy_issuance_total", "outcome" => outcome).increment(1);
}

pub fn record_poll_timeout(stage: &'static str) {
    ::metrics::counter!("acme_proxy_poll_timeouts_total", "stage" => stage).increment(1);
}
