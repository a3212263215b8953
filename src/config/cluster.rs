//! Cluster Configuration
//!
//! Membership and timing for the leadership-only consensus layer.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Consensus membership and transport configuration (`[raft]`)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Node identifier (defaults to the hostname when not set)
    pub id: Option<String>,

    /// Address the consensus transport listens on, `host:port`
    pub bind: String,

    /// Fixed bootstrap membership, in file order
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Interval between leader heartbeats
    /// Default: 200ms
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Base election timeout, randomized in [t, 2t)
    /// Default: 1s
    #[serde(with = "humantime_serde", default = "default_election_timeout")]
    pub election_timeout: Duration,
}

/// One member of the bootstrap set
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    /// Unique node identifier
    pub id: String,
    /// Consensus transport address, `ip:port`
    pub addr: String,
}

impl PeerConfig {
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_election_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            id: None,
            bind: String::new(),
            peers: Vec::new(),
            heartbeat_interval: default_heartbeat_interval(),
            election_timeout: default_election_timeout(),
        }
    }
}

impl ClusterConfig {
    /// Get the node ID, falling back to the hostname if not set
    pub fn node_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_default()
        })
    }

    /// Parse every peer address, preserving file order
    pub fn peer_addrs(&self) -> Result<Vec<(String, SocketAddr)>, ConfigError> {
        self.peers
            .iter()
            .map(|peer| {
                peer.addr
                    .parse::<SocketAddr>()
                    .map(|addr| (peer.id.clone(), addr))
                    .map_err(|_| {
                        ConfigError::Validation(format!(
                            "peer '{}' has invalid address '{}'",
                            peer.id, peer.addr
                        ))
                    })
            })
            .collect()
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.peers.is_empty() {
            return Err(ConfigError::Validation(
                "raft.peers must list at least one member".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.id.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "peer with address '{}' has an empty id",
                    peer.addr
                )));
            }
            if !seen.insert(peer.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate peer id '{}'",
                    peer.id
                )));
            }
        }
        self.peer_addrs()?;

        let id = self.node_id();
        if !seen.contains(id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "node id '{}' is not a member of raft.peers",
                id
            )));
        }

        if self.bind.trim().is_empty() {
            return Err(ConfigError::Validation(
                "raft.bind is required".to_string(),
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Validation(
                "raft.heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        if self.election_timeout <= self.heartbeat_interval {
            return Err(ConfigError::Validation(
                "raft.election_timeout must be longer than raft.heartbeat_interval".to_string(),
            ));
        }

        Ok(())
    }
}
