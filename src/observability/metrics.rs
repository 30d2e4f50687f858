//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, WAF verdicts, logins, cache, domains)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route kind
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_waf_verdicts_total` (counter): WAF outcomes by check and verdict
//! - `gateway_oauth_transitions_total` (counter): login state machine outcomes
//! - `gateway_cdn_lookups_total` (counter): cache hit, populate, fallthrough
//! - `gateway_domains_loaded` (gauge): size of the active domain table
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps unit tests free of setup
//! - Labels are low-cardinality: no hosts, paths or client addresses

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished request.
pub fn record_request(method: &str, status: u16, route: &'static str, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.clone(),
        "status" => status.clone(),
        "route" => route
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method,
        "status" => status,
        "route" => route
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record a WAF outcome. `check` is `cc` or `policy`.
pub fn record_waf_verdict(check: &'static str, verdict: &'static str) {
    metrics::counter!("gateway_waf_verdicts_total", "check" => check, "verdict" => verdict)
        .increment(1);
}

pub fn record_oauth_transition(state: &'static str) {
    metrics::counter!("gateway_oauth_transitions_total", "state" => state).increment(1);
}

pub fn record_cdn_lookup(outcome: &'static str) {
    metrics::counter!("gateway_cdn_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_domains_loaded(count: usize) {
    metrics::gauge!("gateway_domains_loaded").set(count as f64);
}
