//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): forwarded requests by outcome
//! - `relay_forward_duration_seconds` (histogram): time spent in `forward`,
//!   lock wait and inline reconnect included
//! - `relay_upstream_up` (gauge): 1 while the upstream connection is up
//! - `relay_connect_attempts_total` (counter): connects by result
//! - `relay_transport_failures_total` (counter): handles lost mid-session

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_forward(outcome: &'static str, start: Instant) {
    metrics::counter!("relay_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("relay_forward_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_connect(result: &'static str) {
    metrics::counter!("relay_connect_attempts_total", "result" => result).increment(1);
}

pub fn record_transport_failure() {
    metrics::counter!("relay_transport_failures_total").increment(1);
}

pub fn set_upstream_up(up: bool) {
    metrics::gauge!("relay_upstream_up").set(if up { 1.0 } else { 0.0 });
}
