//! Process-wide observability for the kestrel node.
//!
//! - [`init_logging`]: `tracing` subscriber with stdout, debug-file and error-file layers
//! - [`install_prometheus_exporter`]: Prometheus scrape endpoint for `metrics`

mod logging;
mod prometheus;

pub use logging::{LoggingConfig, init_logging};
pub use prometheus::install_prometheus_exporter;
