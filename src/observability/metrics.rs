//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_exchanges_total` (counter): relay exchanges by side and outcome
//! - `tunnel_bytes_total` (counter): payload bytes by direction
//! - `tunnel_sessions_active` (gauge): live sessions by side
//! - `tunnel_exchange_duration_seconds` (histogram): forward round trip latency

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Which end of the tunnel recorded a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Forward,
    Reverse,
}

impl Side {
    fn as_str(self) -> &'static str {
        match self {
            Side::Forward => "forward",
            Side::Reverse => "reverse",
        }
    }
}

/// Start the Prometheus scrape endpoint. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_exchange(side: Side, outcome: &'static str) {
    counter!("tunnel_exchanges_total", "side" => side.as_str(), "outcome" => outcome).increment(1);
}

pub fn record_exchange_latency(start: Instant) {
    histogram!("tunnel_exchange_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// `direction` is "upstream" (towards the destination) or "downstream".
pub fn record_bytes(direction: &'static str, n: usize) {
    if n > 0 {
        counter!("tunnel_bytes_total", "direction" => direction).increment(n as u64);
    }
}

pub fn session_opened(side: Side) {
    gauge!("tunnel_sessions_active", "side" => side.as_str()).increment(1.0);
}

pub fn session_closed(side: Side) {
    gauge!("tunnel_sessions_active", "side" => side.as_str()).decrement(1.0);
}
