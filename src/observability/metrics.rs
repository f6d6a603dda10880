//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_rejections_total` (counter): rejections by kind
//! - `guard_rate_limit_decisions_total` (counter): decisions by channel, outcome
//! - `guard_store_failures_total` (counter): shared store failures by channel, policy
//! - `guard_buckets_evicted_total` (counter): idle buckets reclaimed by channel
//! - `guard_active_buckets` (gauge): buckets currently tracked by channel
//!
//! # Design Decisions
//! - Keys and identities are never used as labels (unbounded cardinality)
//! - Recording without an installed exporter is a no-op

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_decision(channel: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    ::metrics::counter!(
        "guard_rate_limit_decisions_total",
        "channel" => channel.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_evicted(channel: &str, evicted: usize, remaining: usize) {
    ::metrics::counter!("guard_buckets_evicted_total", "channel" => channel.to_string())
        .increment(evicted as u64);
    ::metrics::gauge!("guard_active_buckets", "channel" => channel.to_string())
        .set(remaining as f64);
}

pub fn record_store_failure(channel: &str, policy: &'static str) {
    ::metrics::counter!(
        "guard_store_failures_total",
        "channel" => channel.to_string(),
        "policy" => policy
    )
    .increment(1);
}

pub fn record_rejection(kind: &'static str) {
    ::metrics::counter!("guard_rejections_total", "kind" => kind).increment(1);
}
