//! Observability setup: structured logging and Prometheus metrics.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vigil=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize the Prometheus exporter on `listen_addr`.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record one orchestrated client query.
/// `mode` is "streaming" or "sync"; `outcome` is "ok" or an error kind.
pub fn record_query_metrics(duration_us: u64, mode: &str, outcome: &str) {
    metrics::counter!("vigil_queries_total", "mode" => mode.to_string(), "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("vigil_query_duration_us", "mode" => mode.to_string()).record(duration_us as f64);
}

/// Record the number of keys a query fanned out to.
pub fn record_fanout(keys: usize) {
    metrics::histogram!("vigil_query_fanout_keys").record(keys as f64);
}

/// Record a phase deadline firing. `phase` is "index" or "storage".
pub fn record_phase_timeout(phase: &str) {
    metrics::counter!("vigil_phase_timeouts_total", "phase" => phase.to_string()).increment(1);
}

/// Record a single storage fetch outcome
/// ("success", "not_found", "backend_error", "malformed", "transport_error").
pub fn record_fetch_outcome(outcome: &str) {
    metrics::counter!("vigil_storage_fetches_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a cancelled in-flight fetch.
pub fn record_fetch_cancelled() {
    metrics::counter!("vigil_storage_fetches_cancelled_total").increment(1);
}

/// Record a pass-through forward to one of the simple tiers.
pub fn record_forward(service: &str, success: bool, duration_us: u64) {
    metrics::counter!(
        "vigil_forwards_total",
        "service" => service.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
    metrics::histogram!("vigil_forward_duration_us", "service" => service.to_string())
        .record(duration_us as f64);
}

/// Record the current member count of one backend pool.
pub fn record_pool_size(service: &str, size: usize) {
    metrics::gauge!("vigil_backend_pool_size", "service" => service.to_string()).set(size as f64);
}

/// Record the current number of rows in the metrics-info table.
pub fn record_metrics_table_size(size: usize) {
    metrics::gauge!("vigil_metrics_table_entries").set(size as f64);
}
