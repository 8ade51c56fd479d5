//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define session engine metrics (calls, completions, connection churn)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `rpc_requests_total` (counter): calls issued, by channel
//! - `rpc_completions_total` (counter): terminal outcomes, by channel and outcome
//! - `rpc_connection_events_total` (counter): connect / connected / closed / reconnect / idle_close
//! - `rpc_redispatched_total` (counter): requests moved to another connection
//! - `rpc_pending_requests` (gauge): requests currently owned by a channel queue
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op
//! - Labels limited to channel name and a fixed outcome vocabulary

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> bool {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            tracing::info!(address = %addr, "Metrics exporter listening");
            true
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
            false
        }
    }
}

pub fn record_request(channel: &str) {
    counter!("rpc_requests_total", "channel" => channel.to_string()).increment(1);
}

pub fn record_completion(channel: &str, outcome: &'static str) {
    counter!(
        "rpc_completions_total",
        "channel" => channel.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_connection_event(channel: &str, event: &'static str) {
    counter!(
        "rpc_connection_events_total",
        "channel" => channel.to_string(),
        "event" => event
    )
    .increment(1);
}

pub fn record_redispatch(channel: &str, count: usize) {
    counter!("rpc_redispatched_total", "channel" => channel.to_string()).increment(count as u64);
}

pub fn record_pending(channel: &str, pending: usize) {
    gauge!("rpc_pending_requests", "channel" => channel.to_string()).set(pending as f64);
}
