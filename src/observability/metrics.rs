//! Metrics collection and exposition.
//!
//! # Metrics
//! - `promptpay_quotes_total` (counter): quote outcomes (`issued`, `failed`, `dropped`)
//! - `promptpay_terminal_total` (counter): sessions ending by `status`
//! - `promptpay_stale_events_total` (counter): events for a non-active reference
//! - `promptpay_channel_errors_total` (counter): channel failures by `kind`
//! - `promptpay_gateway_request_duration_seconds` (histogram): per `op`, `outcome`

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
/// Must be called from inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_gateway_request(op: &'static str, ok: bool, start: Instant) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::histogram!(
        "promptpay_gateway_request_duration_seconds",
        "op" => op,
        "outcome" => outcome
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_quote(outcome: &'static str) {
    metrics::counter!("promptpay_quotes_total", "outcome" => outcome).increment(1);
}

pub fn record_terminal(status: &'static str) {
    metrics::counter!("promptpay_terminal_total", "status" => status).increment(1);
}

pub fn record_stale_event() {
    metrics::counter!("promptpay_stale_events_total").increment(1);
}

pub fn record_channel_error(kind: &'static str) {
    metrics::counter!("promptpay_channel_errors_total", "kind" => kind).increment(1);
}
