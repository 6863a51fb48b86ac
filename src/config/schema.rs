//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the shuffle
//! server. All types derive Serde traits for deserialization from config files.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Root configuration for the shuffle server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host or IP address to bind the listener to (no port; see `port_range`).
    pub bind_address: String,

    /// Ordered candidate ports to try, e.g. "50100-50200" or "9000,9100-9110".
    /// A candidate of 0 asks the OS for an ephemeral port.
    pub port_range: PortRange,

    /// Accept-queue backlog size. 0 means platform default.
    pub backlog: u32,

    /// SO_SNDBUF / SO_RCVBUF hint in bytes, applied to the listening socket
    /// and every accepted connection. 0 means platform default.
    pub buffer_size: u32,

    /// Number of worker threads handling accepted connections and their I/O.
    pub worker_threads: usize,

    /// Optional TLS configuration. When present, every accepted connection
    /// starts with a TLS handshake before protocol stages run.
    pub tls: Option<TlsConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port_range: PortRange::ephemeral(),
            backlog: 0,
            buffer_size: 0,
            worker_threads: 4,
            tls: None,
            observability: ObservabilityConfig::default(),
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics exporter.
    pub metrics_enabled: bool,

    /// Metrics exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Error produced when a port range string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortRangeError {
    #[error("port range must not be empty")]
    Empty,
    #[error("invalid port number in range segment '{0}'")]
    InvalidPort(String),
    #[error("descending range segment '{0}' (start must be <= end)")]
    Descending(String),
}

/// Ordered, finite set of candidate ports.
///
/// Parsed from strings such as `"50100-50200"`, `"9000"`, or
/// `"9000,50100-50110"`. Candidates are tried strictly in the configured
/// order during binding. `Display` reproduces the configured form, which is
/// used in error messages, logs, and worker thread names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRange {
    spec: String,
    segments: Vec<(u16, u16)>,
}

impl PortRange {
    /// The range consisting of the single candidate 0 (OS-assigned port).
    pub fn ephemeral() -> Self {
        Self {
            spec: "0".to_string(),
            segments: vec![(0, 0)],
        }
    }

    /// Lazy iterator over the candidate ports in configured order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.segments.iter().flat_map(|&(start, end)| start..=end)
    }

    /// Total number of candidate ports.
    pub fn len(&self) -> usize {
        self.segments
            .iter()
            .map(|&(start, end)| (end - start) as usize + 1)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FromStr for PortRange {
    type Err = PortRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        if spec.is_empty() {
            return Err(PortRangeError::Empty);
        }

        let mut segments = Vec::new();
        for segment in spec.split(',') {
            let segment = segment.trim();
            let parse = |p: &str| {
                p.trim()
                    .parse::<u16>()
                    .map_err(|_| PortRangeError::InvalidPort(segment.to_string()))
            };
            match segment.split_once('-') {
                Some((start, end)) => {
                    let (start, end) = (parse(start)?, parse(end)?);
                    if start > end {
                        return Err(PortRangeError::Descending(segment.to_string()));
                    }
                    segments.push((start, end));
                }
                None => {
                    let port = parse(segment)?;
                    segments.push((port, port));
                }
            }
        }

        Ok(Self {
            spec: spec.to_string(),
            segments,
        })
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let spec = String::deserialize(deserializer)?;
        spec.parse().map_err(D::Error::custom)
    }
}

impl Serialize for PortRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.spec)
    }
}
