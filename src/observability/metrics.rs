//! Tunnel metrics.
//!
//! # Metrics
//! - `tunnel_payloads_total` (counter): payloads by direction
//! - `tunnel_payload_bytes_total` (counter): payload bytes by direction
//! - `tunnel_responses_total` (counter): tunnel endpoint responses by status
//! - `tunnel_sessions_active` (gauge): open target sessions

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Direction of payload travel relative to the HTTP wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_payload(direction: Direction, bytes: usize) {
    counter!("tunnel_payloads_total", "direction" => direction.as_str()).increment(1);
    counter!("tunnel_payload_bytes_total", "direction" => direction.as_str()).increment(bytes as u64);
}

pub fn record_response(status: u16) {
    counter!("tunnel_responses_total", "status" => status.to_string()).increment(1);
}

pub fn session_opened() {
    gauge!("tunnel_sessions_active").increment(1.0);
}

pub fn session_closed() {
    gauge!("tunnel_sessions_active").decrement(1.0);
}
