//! Metrics configuration

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is served
    pub enabled: bool,
    /// HTTP bind address for metrics endpoint
    pub bind: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}
