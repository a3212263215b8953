//! Leadership from an `openraft` cluster
//!
//! Every member bootstraps the same fixed membership; whichever node
//! `openraft` elects is the leader. `openraft` keeps a partitioned leader
//! in the `Leader` state until it hears a newer term, so leadership is only
//! reported while the leader has confirmed a quorum within the last
//! election timeout.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hasher;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fnv::FnvHasher;
use openraft::error::{InitializeError, RaftError};
use openraft::{BasicNode, RaftMetrics, ServerState};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ClusterConfig;

use super::network::{accept_loop, Network, PeerServer};
use super::store::{LogStore, StateMachineStore};
use super::{
    Consensus, ConsensusError, ConsensusResult, LeadershipEvent, NodeId, RaftState, TypeConfig,
};

type Raft = openraft::Raft<TypeConfig>;
type Metrics = RaftMetrics<NodeId, BasicNode>;

/// Buffered leadership events per subscriber
const EVENT_CAPACITY: usize = 16;

/// Floor for per-RPC timeouts
const MIN_RPC_TIMEOUT: Duration = Duration::from_millis(50);

/// Raft id for a configured peer id
pub(super) fn node_id(name: &str) -> NodeId {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.finish()
}

/// The fixed membership, checked and keyed by raft id
fn membership(config: &ClusterConfig, id: &str) -> ConsensusResult<BTreeMap<NodeId, BasicNode>> {
    if config.peers.is_empty() {
        return Err(ConsensusError::InvalidMembership(
            "no peers configured".to_string(),
        ));
    }

    let mut members = BTreeMap::new();
    let mut names: HashMap<NodeId, &str> = HashMap::new();
    let mut seen = HashSet::new();
    for peer in &config.peers {
        if !seen.insert(peer.id.as_str()) {
            return Err(ConsensusError::InvalidMembership(format!(
                "duplicate peer id '{}'",
                peer.id
            )));
        }
        if peer.addr.parse::<SocketAddr>().is_err() {
            return Err(ConsensusError::InvalidPeerAddress {
                id: peer.id.clone(),
                addr: peer.addr.clone(),
            });
        }

        let raft_id = node_id(&peer.id);
        if let Some(other) = names.insert(raft_id, &peer.id) {
            return Err(ConsensusError::InvalidMembership(format!(
                "peer ids '{}' and '{}' collide",
                other, peer.id
            )));
        }
        members.insert(
            raft_id,
            BasicNode {
                addr: peer.addr.clone(),
            },
        );
    }

    if !seen.contains(id) {
        return Err(ConsensusError::InvalidMembership(format!(
            "node '{}' is not in the peer list",
            id
        )));
    }
    Ok(members)
}

fn raft_config(config: &ClusterConfig) -> ConsensusResult<openraft::Config> {
    let election = config.election_timeout.as_millis() as u64;
    openraft::Config {
        cluster_name: "floatd".to_string(),
        heartbeat_interval: config.heartbeat_interval.as_millis() as u64,
        election_timeout_min: election,
        election_timeout_max: election * 2,
        ..Default::default()
    }
    .validate()
    .map_err(|e| ConsensusError::Config(e.to_string()))
}

/// Confirmed leadership, published on change
struct Leadership {
    leading: AtomicBool,
    events: broadcast::Sender<LeadershipEvent>,
}

impl Leadership {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            leading: AtomicBool::new(false),
            events,
        }
    }

    fn is_leader(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }

    fn set(&self, leading: bool, term: u64) {
        if self.leading.swap(leading, Ordering::SeqCst) == leading {
            return;
        }
        if leading {
            info!(term, "became leader");
        } else {
            info!(term, "stepped down from leader");
        }
        // No receivers is fine; consumers poll state() as well
        let _ = self.events.send(LeadershipEvent::from(leading));
    }
}

/// Ask a quorum whether we still lead, bounded by the lease
async fn confirm(raft: &Raft, lease: Duration) -> bool {
    match timeout(lease, raft.ensure_linearizable()).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "leadership not confirmed");
            false
        }
        Err(_) => {
            debug!("leadership confirmation timed out");
            false
        }
    }
}

/// Track `openraft` state, reporting leadership only within the lease
async fn watch_leadership(
    raft: Raft,
    leadership: Arc<Leadership>,
    lease: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut metrics = raft.metrics();
    let mut ticker = interval(lease / 3);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut confirmed_at: Option<Instant> = None;

    loop {
        let tick = tokio::select! {
            _ = shutdown.changed() => break,
            changed = metrics.changed() => {
                if changed.is_err() {
                    break;
                }
                false
            }
            _ = ticker.tick() => true,
        };

        let (raft_leader, term) = {
            let current = metrics.borrow();
            (current.state == ServerState::Leader, current.current_term)
        };

        if !raft_leader {
            confirmed_at = None;
        } else if tick || !leadership.is_leader() {
            if confirm(&raft, lease).await {
                confirmed_at = Some(Instant::now());
            } else if leadership.is_leader() {
                warn!(term, "leader could not confirm a majority");
            }
        }

        let leading = raft_leader && confirmed_at.is_some_and(|at| at.elapsed() < lease);
        leadership.set(leading, term);
    }
    debug!("leadership watcher stopped");
}

/// A running consensus node
pub struct RaftNode {
    raft: Raft,
    metrics: watch::Receiver<Metrics>,
    /// Configured address of each member
    addresses: BTreeMap<NodeId, String>,
    leadership: Arc<Leadership>,
    local_addr: SocketAddr,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RaftNode {
    /// Bootstrap the fixed membership and start participating in elections.
    ///
    /// `fingerprint` is the digest of this node's shared settings, sent with
    /// every request so peers can detect divergent configuration.
    pub async fn bootstrap(config: &ClusterConfig, fingerprint: u64) -> ConsensusResult<Self> {
        let name = config.node_id();
        let members = membership(config, &name)?;
        let id = node_id(&name);
        let raft_config = Arc::new(raft_config(config)?);

        let bind = tokio::net::lookup_host(config.bind.as_str())
            .await
            .map_err(|e| ConsensusError::Resolve {
                addr: config.bind.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ConsensusError::Resolve {
                addr: config.bind.clone(),
                reason: "no addresses found".to_string(),
            })?;
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| ConsensusError::Bind { addr: bind, source })?;
        let local_addr = listener.local_addr()?;

        let rpc_timeout = (config.election_timeout / 2).max(MIN_RPC_TIMEOUT);
        let span = info_span!("raft", node_id = %name);

        let raft = Raft::new(
            id,
            raft_config,
            Network::new(name.clone(), fingerprint, rpc_timeout),
            LogStore::default(),
            StateMachineStore::default(),
        )
        .instrument(span.clone())
        .await
        .map_err(|e| ConsensusError::Raft(e.to_string()))?;

        match raft.initialize(members.clone()).await {
            Ok(()) => debug!(node_id = %name, "initialized membership"),
            Err(RaftError::APIError(InitializeError::NotAllowed(e))) => {
                debug!(node_id = %name, reason = %e, "membership already initialized");
            }
            Err(e) => return Err(ConsensusError::Raft(e.to_string())),
        }

        let leadership = Arc::new(Leadership::new());
        let server = Arc::new(PeerServer::new(raft.clone(), fingerprint, rpc_timeout));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(
                accept_loop(server, listener, shutdown_rx.clone()).instrument(span.clone()),
            ),
            tokio::spawn(
                watch_leadership(
                    raft.clone(),
                    leadership.clone(),
                    config.election_timeout,
                    shutdown_rx,
                )
                .instrument(span),
            ),
        ];

        info!(
            node_id = %name,
            %local_addr,
            members = members.len(),
            "consensus node started"
        );

        Ok(Self {
            metrics: raft.metrics(),
            raft,
            addresses: members
                .into_iter()
                .map(|(id, node)| (id, node.addr))
                .collect(),
            leadership,
            local_addr,
            stopped: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Address the transport actually listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop raft and the listener, waiting for background tasks to exit.
    ///
    /// A leader steps down, publishing `Lost`.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "consensus task failed");
            }
        }

        if let Err(e) = self.raft.shutdown().await {
            warn!(error = %e, "raft core failed during shutdown");
        }
        self.leadership.set(false, self.term());
        info!(local_addr = %self.local_addr, "consensus node stopped");
    }
}

impl Consensus for RaftNode {
    fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent> {
        self.leadership.events.subscribe()
    }

    fn leader_address(&self) -> String {
        if self.stopped.load(Ordering::SeqCst) {
            return String::new();
        }
        self.metrics
            .borrow()
            .current_leader
            .and_then(|leader| self.addresses.get(&leader).cloned())
            .unwrap_or_default()
    }

    fn state(&self) -> RaftState {
        if self.stopped.load(Ordering::SeqCst) {
            return RaftState::Follower;
        }
        if self.leadership.is_leader() {
            return RaftState::Leader;
        }
        match self.metrics.borrow().state {
            // Elected but not yet confirmed, or no longer confirmed
            ServerState::Leader | ServerState::Candidate => RaftState::Candidate,
            _ => RaftState::Follower,
        }
    }

    fn term(&self) -> u64 {
        self.metrics.borrow().current_term
    }
}
