//! Metrics collection and exposition.
//!
//! # Metrics
//! - `command_executions_total` (counter): executions by command, outcome
//! - `command_latency_seconds` (histogram): time to outcome per command
//! - `command_fallbacks_total` (counter): fallback attempts by command, result
//! - `command_cache_hits_total` (counter): request cache hits by command
//! - `circuit_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `isolation_in_flight` (gauge): occupied slots per pool
//! - `isolation_rejections_total` (counter): rejected acquisitions per pool
//! - `collapser_batches_total` (counter): dispatched batches per collapser
//! - `collapser_batch_size` (histogram): requests per dispatched batch
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::command::Outcome;
use crate::resilience::CircuitState;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_execution(command: &str, outcome: Outcome, start: Instant) {
    counter!(
        "command_executions_total",
        "command" => command.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("command_latency_seconds", "command" => command.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_fallback(command: &str, succeeded: bool) {
    counter!(
        "command_fallbacks_total",
        "command" => command.to_string(),
        "result" => if succeeded { "success" } else { "failure" }
    )
    .increment(1);
}

pub fn record_cache_hit(command: &str) {
    counter!("command_cache_hits_total", "command" => command.to_string()).increment(1);
}

pub fn record_circuit_state(command: &str, state: CircuitState) {
    gauge!("circuit_breaker_state", "command" => command.to_string()).set(state as u8 as f64);
}

pub fn record_pool_in_flight(pool: &str, in_flight: usize) {
    gauge!("isolation_in_flight", "pool" => pool.to_string()).set(in_flight as f64);
}

pub fn record_pool_rejection(pool: &str) {
    counter!("isolation_rejections_total", "pool" => pool.to_string()).increment(1);
}

pub fn record_batch(collapser: &str, size: usize) {
    counter!("collapser_batches_total", "collapser" => collapser.to_string()).increment(1);
    histogram!("collapser_batch_size", "collapser" => collapser.to_string()).record(size as f64);
}
