//! Prometheus exporter for the `metrics` facade.

use std::net::SocketAddr;

use eyre::{Result, WrapErr};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Installs the global recorder and serves `/metrics` on `listen`.
pub fn install_prometheus_exporter(listen: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .wrap_err_with(|| format!("failed to start metrics exporter on {listen}"))?;

    describe();
    info!(%listen, "serving prometheus metrics");
    Ok(())
}

fn describe() {
    metrics::describe_counter!("pool.jobs_total", "Callbacks accepted by a thread pool");
    metrics::describe_counter!("pool.finished_jobs_total", "Accepted callbacks that finished");
    metrics::describe_counter!("pool.futures_total", "Futures accepted by a thread pool");
    metrics::describe_counter!("pool.finished_futures_total", "Accepted futures that finished");
    metrics::describe_gauge!("p2p.registry.size", "Channels held by a connection registry");
}
