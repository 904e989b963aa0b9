//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): handler latency by method
//! - `proxy_body_rewrites_total` (counter): rewrite outcomes
//! - `proxy_body_bytes` (histogram): body size entering and leaving the rewrite
//! - `proxy_pool_discards_total` (counter): pooled objects dropped on release
//!
//! Recording is a no-op until a recorder is installed, so the pipeline calls
//! these unconditionally.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method.to_owned();
    counter!("proxy_requests_total", "method" => method.clone(), "status" => status.to_string())
        .increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rewrite(outcome: &'static str) {
    counter!("proxy_body_rewrites_total", "outcome" => outcome).increment(1);
}

pub fn record_body_bytes(stage: &'static str, len: usize) {
    histogram!("proxy_body_bytes", "stage" => stage).record(len as f64);
}

pub fn record_pool_discard(pool: &'static str) {
    counter!("proxy_pool_discards_total", "pool" => pool).increment(1);
}
