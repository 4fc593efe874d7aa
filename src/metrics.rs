//! Ambient ingestion metrics, exported via Prometheus (spec.md §9 carries
//! ambient observability even though the spec's own scope excludes a query
//! layer over application data — this is process health, not stored data).

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub const BARS_WRITTEN: &str = "ingestor_bars_written_total";
pub const TICKS_PUBLISHED: &str = "ingestor_ticks_published_total";
pub const VENDOR_CALLS: &str = "ingestor_vendor_calls_total";
pub const VENDOR_ERRORS: &str = "ingestor_vendor_errors_total";
pub const STORE_WRITE_ERRORS: &str = "ingestor_store_write_errors_total";
pub const WATCHED_SYMBOLS: &str = "ingestor_watched_symbols";

/// Installs the Prometheus recorder and starts its HTTP exporter on
/// `port`. Call once per process at startup.
pub fn install(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

pub fn record_bars_written(n: u64) {
    metrics::counter!(BARS_WRITTEN).increment(n);
}

pub fn record_tick_published() {
    metrics::counter!(TICKS_PUBLISHED).increment(1);
}

pub fn record_vendor_call() {
    metrics::counter!(VENDOR_CALLS).increment(1);
}

pub fn record_vendor_error() {
    metrics::counter!(VENDOR_ERRORS).increment(1);
}

pub fn record_store_write_error() {
    metrics::counter!(STORE_WRITE_ERRORS).increment(1);
}

pub fn set_watched_symbols(n: f64) {
    metrics::gauge!(WATCHED_SYMBOLS).set(n);
}
