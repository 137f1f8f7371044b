//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_host_lookups_total` (counter): lookups by `result` (host, overload, not_exist)
//! - `lb_host_transitions_total` (counter): host state changes by `kind`
//! - `lb_pulls_requested_total` (counter): pulls handed to the pull worker
//! - `lb_reports_pushed_total` (counter): health reports handed to the report worker
//! - `lb_control_plane_failures_total` (counter): calls given up on, by `kind`
//! - `lb_endpoints` (gauge): endpoints tracked, by `shard`

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_lookup(result: &'static str) {
    ::metrics::counter!("lb_host_lookups_total", "result" => result).increment(1);
}

pub fn record_transition(kind: &'static str) {
    ::metrics::counter!("lb_host_transitions_total", "kind" => kind).increment(1);
}

pub fn record_pull() {
    ::metrics::counter!("lb_pulls_requested_total").increment(1);
}

pub fn record_report_pushed() {
    ::metrics::counter!("lb_reports_pushed_total").increment(1);
}

pub fn record_control_plane_failure(kind: &'static str) {
    ::metrics::counter!("lb_control_plane_failures_total", "kind" => kind).increment(1);
}

pub fn record_endpoints(shard: usize, count: usize) {
    ::metrics::gauge!("lb_endpoints", "shard" => shard.to_string()).set(count as f64);
}
