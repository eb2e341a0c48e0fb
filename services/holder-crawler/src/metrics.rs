//! Prometheus metrics exposition
//!
//! Library crates emit through the `metrics` facade:
//!
//! - `pool_acquire_total` (counter): labels `pool`, `outcome`
//! - `pool_resource_errors_total` (counter): label `pool`
//! - `pool_resources_deactivated_total` (counter): labels `pool`, `cause`
//! - `fetch_requests_total`, `fetch_page_errors_total{kind}`, `fetch_outcomes_total{reason}`
//! - `harvest_units_total` (counter): label `outcome`
//!
//! The binary adds `pool_resources{pool,status}` (gauge) and
//! `harvest_flushes_total{outcome}` (counter). Without an installed recorder
//! every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use resource_pool::PoolHealth;

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
///
/// Must be called from inside the tokio runtime; the listener runs as a task.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn describe() {
    metrics::describe_counter!(
        "pool_acquire_total",
        "Acquire calls by pool and outcome (granted, none_available)"
    );
    metrics::describe_counter!(
        "pool_resource_errors_total",
        "Errors reported against pooled resources"
    );
    metrics::describe_counter!(
        "pool_resources_deactivated_total",
        "Resources taken out of rotation, by cause"
    );
    metrics::describe_counter!("fetch_requests_total", "Page requests issued");
    metrics::describe_counter!("fetch_page_errors_total", "Failed page requests by kind");
    metrics::describe_counter!("fetch_outcomes_total", "Finished fetches by stop reason");
    metrics::describe_counter!("harvest_units_total", "Units finished by outcome");
    metrics::describe_gauge!("pool_resources", "Pool resources by status");
    metrics::describe_counter!("harvest_flushes_total", "Result flushes by outcome");
}

/// Publish one pool's end-of-run health.
pub fn record_pool_health(pool: &str, health: &PoolHealth) {
    for (status, count) in [
        ("active", health.active),
        ("probing", health.probing),
        ("unhealthy", health.unhealthy),
        ("disabled", health.disabled),
    ] {
        metrics::gauge!("pool_resources", "pool" => pool.to_string(), "status" => status)
            .set(count as f64);
    }
}

pub fn record_flush(succeeded: bool) {
    let outcome = if succeeded { "ok" } else { "failed" };
    metrics::counter!("harvest_flushes_total", "outcome" => outcome).increment(1);
}
