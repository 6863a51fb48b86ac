//! Metrics collection and exposition.
//!
//! # Metrics
//! - `shuffle_connections_accepted_total` (counter): accepted connections
//! - `shuffle_active_connections` (gauge): currently open connections
//! - `shuffle_bind_attempts_total` (counter): candidate-port bind attempts
//! - `shuffle_server_init_duration_ms` (histogram): init wall time
//! - `shuffle_server_shutdown_duration_ms` (histogram): shutdown wall time
//!
//! # Design Decisions
//! - Metric macros are emitted unconditionally; without an installed
//!   recorder they are no-ops
//! - The Prometheus exporter is opt-in via configuration

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::config::ObservabilityConfig;

pub const CONNECTIONS_ACCEPTED_TOTAL: &str = "shuffle_connections_accepted_total";
pub const ACTIVE_CONNECTIONS: &str = "shuffle_active_connections";
pub const BIND_ATTEMPTS_TOTAL: &str = "shuffle_bind_attempts_total";
pub const INIT_DURATION_MS: &str = "shuffle_server_init_duration_ms";
pub const SHUTDOWN_DURATION_MS: &str = "shuffle_server_shutdown_duration_ms";

/// Failure installing the metrics exporter.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("invalid metrics address '{0}'")]
    InvalidAddress(String),
    #[error("failed to install Prometheus exporter")]
    Exporter(#[from] BuildError),
}

/// Install the Prometheus exporter on the configured address.
pub fn install_exporter(config: &ObservabilityConfig) -> Result<(), MetricsError> {
    let address: SocketAddr = config
        .metrics_address
        .parse()
        .map_err(|_| MetricsError::InvalidAddress(config.metrics_address.clone()))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()?;

    tracing::info!(%address, "Prometheus metrics exporter listening");
    Ok(())
}

/// Register metric descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    metrics::describe_counter!(
        CONNECTIONS_ACCEPTED_TOTAL,
        "Total connections accepted by the shuffle listener"
    );
    metrics::describe_gauge!(
        ACTIVE_CONNECTIONS,
        "Connections currently open on the shuffle listener"
    );
    metrics::describe_counter!(
        BIND_ATTEMPTS_TOTAL,
        "Candidate-port bind attempts, including retried candidates"
    );
    metrics::describe_histogram!(
        INIT_DURATION_MS,
        "Wall time of shuffle server initialization in milliseconds"
    );
    metrics::describe_histogram!(
        SHUTDOWN_DURATION_MS,
        "Wall time of shuffle server shutdown in milliseconds"
    );
}
