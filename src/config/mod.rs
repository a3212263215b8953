//! Configuration Module
//!
//! Provides TOML-based configuration for floatd with support for:
//! - Consensus membership and timing
//! - The floating address and its interface
//! - Time-sync daemon mode and upstream servers
//! - Control loop and metrics settings
//! - Environment variable overrides (FLOATD__* prefix)

use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use fnv::FnvHasher;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

pub use cluster::{ClusterConfig, PeerConfig};
pub use metrics::MetricsConfig;
pub use network::VipConfig;
pub use timesync::{TimeSyncConfig, TimeSyncMode};

mod cluster;
mod metrics;
mod network;
mod timesync;

#[cfg(test)]
mod tests;

/// Default configuration file name searched for when `--config` is absent
pub const CONFIG_FILE_NAME: &str = "floatd.toml";

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("env substitution pattern is valid")
});

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string()
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Config crate error
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Consensus membership
    pub raft: ClusterConfig,
    /// Floating address
    pub network: VipConfig,
    /// Time-sync daemon
    pub ntp: TimeSyncConfig,
    /// Control loop settings
    pub manager: ManagerConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Log file; stdout when unset
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Control loop configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Reconciliation tick shared by both loops
    /// Default: 1s
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `FLOATD__` prefix with double underscores for nesting:
    ///    - `FLOATD__RAFT__ID=node-b` overrides `raft.id`
    ///    - `FLOATD__NETWORK__VIP=10.0.0.100` overrides `network.vip`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::build(Some(&substitute_env_vars(&content)))
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(None)
    }

    /// Load the explicit file if given, otherwise the first file found on the
    /// search path, otherwise defaults plus environment.
    ///
    /// Returns the file actually used.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::from_env()?, None)),
        }
    }

    /// Candidate files, in priority order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(3);
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(format!(".{}", CONFIG_FILE_NAME)));
        }
        paths.push(PathBuf::from(".").join(CONFIG_FILE_NAME));
        paths.push(PathBuf::from("/etc/floatd").join(CONFIG_FILE_NAME));
        paths
    }

    fn build(content: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("log.format", "compact")?
            .set_default("raft.heartbeat_interval", "200ms")?
            .set_default("raft.election_timeout", "1s")?
            .set_default("ntp.mode", "internal")?
            .set_default("ntp.config_path", "/etc/chrony.conf")?
            .set_default("ntp.service", "chronyd")?
            .set_default("manager.tick_interval", "1s")?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.bind", "0.0.0.0:9090")?;

        if let Some(content) = content {
            builder = builder.add_source(File::from_str(content, FileFormat::Toml));
        }

        // Override with environment variables (FLOATD__NETWORK__VIP, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("FLOATD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.raft.validate()?;
        self.network.validate()?;
        self.ntp.validate()?;

        if self.manager.tick_interval.is_zero() {
            return Err(ConfigError::Validation(
                "manager.tick_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Stable digest of the settings every node must agree on.
    ///
    /// Covers the VIP and the time-sync mode and servers. Interface names are
    /// host-local and excluded.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        match self.network.vip_net() {
            Ok(net) => hasher.write(net.to_string().as_bytes()),
            Err(_) => hasher.write(self.network.vip.as_bytes()),
        }
        hasher.write_u8(0);
        hasher.write(self.ntp.mode.to_string().as_bytes());
        for server in &self.ntp.servers {
            hasher.write_u8(0);
            hasher.write(server.trim().as_bytes());
        }
        hasher.finish()
    }
}
