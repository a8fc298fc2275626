//! Observability setup: structured logging to stderr, Prometheus metrics.
//!
//! Stdout belongs to the port protocol, so nothing here may write to it.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,termite=debug"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize the Prometheus metrics exporter on `listen_addr`.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record one finished execution task.
/// `outcome` is one of: "rows", "insert", "status", "error".
pub fn record_task_metrics(outcome: &str, duration_us: u64, rows: u64) {
    metrics::counter!("termite_tasks_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("termite_task_duration_us", "outcome" => outcome.to_string())
        .record(duration_us as f64);
    metrics::counter!("termite_rows_encoded_total").increment(rows);
}

/// Record a statement that failed to compile.
pub fn record_prepare_failure() {
    metrics::counter!("termite_prepare_failures_total").increment(1);
}

/// Record a command with an unrecognised tag.
pub fn record_unknown_command(tag: Option<u8>) {
    let tag = tag.map_or_else(|| "empty".to_string(), |t| t.to_string());
    metrics::counter!("termite_unknown_commands_total", "tag" => tag).increment(1);
}

/// Record a reply the transport failed to deliver.
pub fn record_delivery_failure() {
    metrics::counter!("termite_delivery_failures_total").increment(1);
}

/// Number of tasks currently registered on the connection.
pub fn record_in_flight(count: usize) {
    metrics::gauge!("termite_tasks_in_flight").set(count as f64);
}
