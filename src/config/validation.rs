//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (worker threads > 0, non-empty port range)
//! - Check TLS file references are present when TLS is configured
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("bind_address must not be empty")]
    EmptyBindAddress,
    #[error("port_range must contain at least one candidate port")]
    EmptyPortRange,
    #[error("worker_threads must be at least 1")]
    ZeroWorkerThreads,
    #[error("tls.cert_path must not be empty when TLS is configured")]
    EmptyCertPath,
    #[error("tls.key_path must not be empty when TLS is configured")]
    EmptyKeyPath,
    #[error("observability.metrics_address is not a valid socket address: '{0}'")]
    InvalidMetricsAddress(String),
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.bind_address.trim().is_empty() {
        errors.push(ValidationError::EmptyBindAddress);
    }

    if config.port_range.is_empty() {
        errors.push(ValidationError::EmptyPortRange);
    }

    if config.worker_threads == 0 {
        errors.push(ValidationError::ZeroWorkerThreads);
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::EmptyCertPath);
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::EmptyKeyPath);
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let mut config = ServerConfig::default();
        config.bind_address = String::new();
        config.worker_threads = 0;
        config.tls = Some(TlsConfig {
            cert_path: String::new(),
            key_path: "key.pem".into(),
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::EmptyBindAddress));
        assert!(errors.contains(&ValidationError::ZeroWorkerThreads));
        assert!(errors.contains(&ValidationError::EmptyCertPath));
    }

    #[test]
    fn rejects_bad_metrics_address_when_enabled() {
        let mut config = ServerConfig::default();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "not-an-address".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InvalidMetricsAddress(
                "not-an-address".into()
            )]
        );
    }
}
