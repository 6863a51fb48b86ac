//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, file, remote)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Metric updates are cheap (atomic operations) and safe to emit even when
//!   no recorder is installed
//! - The embedding worker decides when to initialize; the listener itself
//!   never installs global subscribers

pub mod logging;
pub mod metrics;

use crate::config::ObservabilityConfig;

/// Initialize logging and, when enabled, the metrics exporter.
///
/// Intended for the embedding worker's startup path; safe to call once per
/// process.
pub fn init(config: &ObservabilityConfig) -> Result<(), metrics::MetricsError> {
    logging::init_logging(config);
    if config.metrics_enabled {
        metrics::install_exporter(config)?;
    }
    metrics::describe_metrics();
    Ok(())
}
