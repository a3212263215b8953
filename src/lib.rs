//! floatd - Consensus-driven failover of a virtual IP and the cluster time source
//!
//! A fixed set of nodes elect a leader. The leader holds the floating
//! address and serves time; followers release the address and sync their
//! clocks from the leader.

pub mod addr;
pub mod config;
pub mod consensus;
pub mod exec;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod network;
pub mod serve;
pub mod timesync;

pub use addr::{split_host, ParseError};
pub use config::Config;
pub use consensus::{Consensus, LeadershipEvent, RaftNode, RaftState};
pub use exec::{CommandRunner, SystemRunner};
pub use manager::Manager;
pub use metrics::{Metrics, MetricsServer};
pub use network::{NetworkManager, VipLink};
pub use serve::{serve, ServeError};
pub use timesync::{Chrony, TimeSyncManager};
