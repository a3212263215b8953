//! Time-Sync Configuration

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::Deserialize;

use super::ConfigError;

/// Where the leader takes its own time from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeSyncMode {
    /// The leader is the stratum source; no upstream servers
    #[default]
    Internal,
    /// The leader syncs from the configured upstream servers
    External,
}

impl fmt::Display for TimeSyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSyncMode::Internal => write!(f, "internal"),
            TimeSyncMode::External => write!(f, "external"),
        }
    }
}

/// Time-sync daemon configuration (`[ntp]`)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    pub mode: TimeSyncMode,
    /// Upstream time servers, used by the leader in external mode
    pub servers: Vec<String>,
    /// Path of the rendered daemon configuration
    /// Default: /etc/chrony.conf
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    /// Service unit restarted after each render
    /// Default: chronyd
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/chrony.conf")
}

fn default_service() -> String {
    "chronyd".to_string()
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            mode: TimeSyncMode::default(),
            servers: Vec::new(),
            config_path: default_config_path(),
            service: default_service(),
        }
    }
}

impl TimeSyncConfig {
    /// Parse the upstream server list
    pub fn server_addrs(&self) -> Result<Vec<IpAddr>, ConfigError> {
        self.servers
            .iter()
            .map(|server| {
                server.trim().parse::<IpAddr>().map_err(|_| {
                    ConfigError::Validation(format!(
                        "failed to parse NTP server '{}'",
                        server
                    ))
                })
            })
            .collect()
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        self.server_addrs()?;
        if self.service.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ntp.service must not be empty".to_string(),
            ));
        }
        if self.config_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "ntp.config_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
