//! Time-Sync Module
//!
//! Which node the fleet takes its time from follows leadership: the leader
//! serves time (from upstreams or its own clock), followers sync from the
//! leader. [`Chrony`] implements [`TimeSyncManager`] by rendering
//! `chrony.conf` and restarting the daemon through systemd.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ConfigError;
use crate::exec::CommandError;

mod chrony;
pub mod template;

pub use chrony::Chrony;

/// Time-sync adapter errors
#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid upstream servers: {0}")]
    InvalidServer(#[source] ConfigError),

    #[error("no configuration has been rendered")]
    NotRendered,

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} failed: {source}")]
    Command {
        step: &'static str,
        #[source]
        source: CommandError,
    },
}

pub type TimeSyncResult<T> = Result<T, TimeSyncError>;

/// Render and activate time-sync configuration for a role.
///
/// Rendering only stages the content; nothing touches the host until
/// [`TimeSyncManager::apply`].
#[async_trait]
pub trait TimeSyncManager: Send + Sync {
    /// Stage the leader configuration
    fn render_leader(&self) -> TimeSyncResult<()>;

    /// Stage a follower configuration pointing at `leader_ip`
    fn render_follower(&self, leader_ip: &str) -> TimeSyncResult<()>;

    /// Write the staged configuration, reload the service manager, restart
    /// the daemon
    async fn apply(&self) -> TimeSyncResult<()>;
}
