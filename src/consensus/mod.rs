//! Consensus Module
//!
//! Leadership for the floating resources comes from an `openraft` cluster
//! over a fixed membership. The log carries no application data and the
//! state machine is empty: the only output is who leads, which the manager
//! consumes through the [`Consensus`] trait.
//!
//! [`RaftNode`] wires `openraft` to in-memory storage ([`store`]) and to a
//! framed TCP transport ([`protocol`]).

use std::fmt;
use std::io::Cursor;
use std::net::SocketAddr;

use openraft::{BasicNode, TokioRuntime};
use thiserror::Error;
use tokio::sync::broadcast;

mod network;
mod node;
pub mod protocol;
mod store;

pub use node::RaftNode;

/// Raft node identifier, derived from the configured peer id
pub type NodeId = u64;

openraft::declare_raft_types!(
    /// Raft types for a log without application data
    pub TypeConfig:
        D = (),
        R = (),
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = TokioRuntime
);

/// A transition of this node's leadership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    /// This node became leader
    Gained,
    /// This node stopped being leader
    Lost,
}

impl LeadershipEvent {
    pub fn is_leader(self) -> bool {
        matches!(self, LeadershipEvent::Gained)
    }
}

impl From<bool> for LeadershipEvent {
    fn from(is_leader: bool) -> Self {
        if is_leader {
            LeadershipEvent::Gained
        } else {
            LeadershipEvent::Lost
        }
    }
}

/// Role of this node in the current term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaftState {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl RaftState {
    pub fn is_leader(self) -> bool {
        self == RaftState::Leader
    }
}

impl fmt::Display for RaftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaftState::Follower => write!(f, "follower"),
            RaftState::Candidate => write!(f, "candidate"),
            RaftState::Leader => write!(f, "leader"),
        }
    }
}

/// Leadership source consumed by the manager.
///
/// Event delivery is at-most-once per transition and a slow receiver may
/// miss events entirely; consumers reconcile against [`Consensus::state`].
pub trait Consensus: Send + Sync {
    /// New receiver of leadership transitions
    fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent>;

    /// Transport address of the current leader, empty when unknown
    fn leader_address(&self) -> String;

    /// Current role
    fn state(&self) -> RaftState;

    /// Current term
    fn term(&self) -> u64;
}

/// Consensus errors
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("invalid membership: {0}")]
    InvalidMembership(String),

    #[error("peer '{id}' has invalid address '{addr}'")]
    InvalidPeerAddress { id: String, addr: String },

    #[error("failed to resolve bind address '{addr}': {reason}")]
    Resolve { addr: String, reason: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the maximum")]
    FrameTooLarge(usize),

    #[error("request timed out")]
    Timeout,

    #[error("invalid raft settings: {0}")]
    Config(String),

    #[error("raft error: {0}")]
    Raft(String),

    #[error("peer rejected request: {0}")]
    Rejected(String),

    #[error("unexpected {0} reply")]
    UnexpectedReply(&'static str),
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;
