//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, breaker, dials, leases, watches)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): inbound requests by service, status
//! - `gateway_request_duration_seconds` (histogram): inbound latency
//! - `gateway_breaker_transitions_total` (counter): by breaker, target state
//! - `gateway_breaker_open` (gauge): 1=open, 0=closed/half-open
//! - `gateway_dial_attempts_total` (counter): by service, outcome
//! - `gateway_rpc_failures_total` (counter): by service, kind (timeout/remote)
//! - `gateway_lease_renewals_total` (counter): by service, outcome
//! - `gateway_watch_events_total` (counter): by service, kind
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(service: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("gateway_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_breaker_transition(breaker: &str, to: &'static str) {
    ::metrics::counter!(
        "gateway_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => to
    )
    .increment(1);
    let open = if to == "open" { 1.0 } else { 0.0 };
    ::metrics::gauge!("gateway_breaker_open", "breaker" => breaker.to_string()).set(open);
}

pub fn record_dial(service: &str, outcome: &'static str) {
    ::metrics::counter!(
        "gateway_dial_attempts_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_rpc_failure(service: &str, kind: &'static str) {
    ::metrics::counter!(
        "gateway_rpc_failures_total",
        "service" => service.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_lease_renewal(service: &str, outcome: &'static str) {
    ::metrics::counter!(
        "gateway_lease_renewals_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_watch_event(service: &str, kind: &'static str) {
    ::metrics::counter!(
        "gateway_watch_events_total",
        "service" => service.to_string(),
        "kind" => kind
    )
    .increment(1);
}
