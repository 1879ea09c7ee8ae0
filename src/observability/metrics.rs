//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mux_requests_total` (counter): requests by outcome and status
//! - `mux_request_duration_seconds` (histogram): latency by outcome
//! - `mux_admissions_total` (counter): admissions by mode (immediate, queued)
//! - `mux_tokens_in_use` (gauge): tokens currently held
//! - `mux_faults_total` (counter): recovered panics by boundary
//! - `referer_sessions` (gauge): live session records
//! - `referer_evictions_total` (counter): records removed by sweeps

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Start the Prometheus exporter. Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(outcome: &'static str, status: u16, start: Instant) {
    counter!("mux_requests_total", "outcome" => outcome, "status" => status.to_string()).increment(1);
    histogram!("mux_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_admission(mode: &'static str) {
    counter!("mux_admissions_total", "mode" => mode).increment(1);
}

pub fn set_tokens_in_use(count: usize) {
    gauge!("mux_tokens_in_use").set(count as f64);
}

pub fn record_fault(boundary: &'static str) {
    counter!("mux_faults_total", "boundary" => boundary).increment(1);
}

pub fn record_referer_size(count: usize) {
    gauge!("referer_sessions").set(count as f64);
}

pub fn record_referer_evictions(count: usize) {
    counter!("referer_evictions_total").increment(count as u64);
}
