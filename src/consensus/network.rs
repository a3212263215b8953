//! Raft RPC over framed TCP
//!
//! [`Network`] hands `openraft` a [`PeerClient`] per target. [`PeerServer`]
//! answers peers on the bound listener and hands requests to the local
//! raft. Both sides speak the frames in [`super::protocol`].

use std::collections::HashSet;
use std::error::Error;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{
    InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError, Unreachable,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn, Instrument};

use super::protocol::{
    read_message, write_message, Envelope, RaftReply, RaftRequest, RAFT_PROTOCOL_VERSION,
};
use super::{ConsensusError, ConsensusResult, NodeId, TypeConfig};

/// Pause after a failed accept
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type Raft = openraft::Raft<TypeConfig>;
type RpcResult<T, E = RaftError<NodeId>> = Result<T, RPCError<NodeId, BasicNode, E>>;

/// Builds clients that stamp requests with this node's identity
#[derive(Clone)]
pub(super) struct Network {
    from: String,
    fingerprint: u64,
    rpc_timeout: Duration,
}

impl Network {
    pub(super) fn new(from: String, fingerprint: u64, rpc_timeout: Duration) -> Self {
        Self {
            from,
            fingerprint,
            rpc_timeout,
        }
    }
}

impl RaftNetworkFactory<TypeConfig> for Network {
    type Network = PeerClient;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        PeerClient {
            target,
            addr: node.addr.clone(),
            from: self.from.clone(),
            fingerprint: self.fingerprint,
            rpc_timeout: self.rpc_timeout,
        }
    }
}

/// Connection details for one peer
pub(super) struct PeerClient {
    target: NodeId,
    addr: String,
    from: String,
    fingerprint: u64,
    rpc_timeout: Duration,
}

impl PeerClient {
    /// One request/response exchange on a fresh connection
    async fn send(&self, request: RaftRequest) -> ConsensusResult<RaftReply> {
        let envelope = Envelope {
            version: RAFT_PROTOCOL_VERSION,
            from: self.from.clone(),
            fingerprint: self.fingerprint,
            request,
        };
        timeout(self.rpc_timeout, exchange(&self.addr, &envelope))
            .await
            .map_err(|_| ConsensusError::Timeout)?
    }

    fn remote<E: Error>(&self, source: E) -> RPCError<NodeId, BasicNode, E> {
        RPCError::RemoteError(RemoteError::new(self.target, source))
    }
}

async fn exchange(addr: &str, envelope: &Envelope) -> ConsensusResult<RaftReply> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    write_message(&mut stream, envelope).await?;
    read_message(&mut stream).await
}

/// Map a transport failure to the error class `openraft` backs off on
fn transport_error<E: Error>(err: ConsensusError) -> RPCError<NodeId, BasicNode, E> {
    let unreachable = match &err {
        ConsensusError::Timeout => true,
        ConsensusError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::NotConnected
                | io::ErrorKind::AddrNotAvailable
        ),
        _ => false,
    };
    if unreachable {
        RPCError::Unreachable(Unreachable::new(&err))
    } else {
        RPCError::Network(NetworkError::new(&err))
    }
}

fn unexpected_reply<E: Error>(reply: RaftReply) -> RPCError<NodeId, BasicNode, E> {
    let err = match reply {
        RaftReply::Rejected { reason } => ConsensusError::Rejected(reason),
        other => ConsensusError::UnexpectedReply(other.type_name()),
    };
    RPCError::Network(NetworkError::new(&err))
}

impl RaftNetwork<TypeConfig> for PeerClient {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> RpcResult<AppendEntriesResponse<NodeId>> {
        let reply = self
            .send(RaftRequest::AppendEntries(rpc))
            .await
            .map_err(transport_error)?;
        match reply {
            RaftReply::AppendEntries(result) => result.map_err(|e| self.remote(e)),
            other => Err(unexpected_reply(other)),
        }
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> RpcResult<InstallSnapshotResponse<NodeId>, RaftError<NodeId, InstallSnapshotError>> {
        let reply = self
            .send(RaftRequest::InstallSnapshot(rpc))
            .await
            .map_err(transport_error)?;
        match reply {
            RaftReply::InstallSnapshot(result) => result.map_err(|e| self.remote(e)),
            other => Err(unexpected_reply(other)),
        }
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> RpcResult<VoteResponse<NodeId>> {
        let reply = self
            .send(RaftRequest::Vote(rpc))
            .await
            .map_err(transport_error)?;
        match reply {
            RaftReply::Vote(result) => result.map_err(|e| self.remote(e)),
            other => Err(unexpected_reply(other)),
        }
    }
}

/// Warns once per distinct remote configuration digest
pub(super) struct FingerprintCheck {
    local: u64,
    seen: Mutex<HashSet<u64>>,
}

impl FingerprintCheck {
    pub(super) fn new(local: u64) -> Self {
        Self {
            local,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Returns whether `remote` differs from the local digest
    fn check(&self, from: &str, remote: u64) -> bool {
        if remote == self.local {
            return false;
        }
        if self.seen.lock().insert(remote) {
            warn!(
                peer = from,
                local = format_args!("{:016x}", self.local),
                remote = format_args!("{:016x}", remote),
                "peer configuration differs from local configuration"
            );
        }
        true
    }
}

/// Serves peer RPCs into the local raft
pub(super) struct PeerServer {
    raft: Raft,
    fingerprints: FingerprintCheck,
    rpc_timeout: Duration,
}

impl PeerServer {
    pub(super) fn new(raft: Raft, fingerprint: u64, rpc_timeout: Duration) -> Self {
        Self {
            raft,
            fingerprints: FingerprintCheck::new(fingerprint),
            rpc_timeout,
        }
    }

    async fn handle(&self, envelope: Envelope) -> RaftReply {
        if let Some(rejected) = check_version(envelope.version) {
            return rejected;
        }
        self.fingerprints.check(&envelope.from, envelope.fingerprint);

        debug!(
            from = %envelope.from,
            request = envelope.request.type_name(),
            "raft request"
        );
        match envelope.request {
            RaftRequest::Vote(rpc) => RaftReply::Vote(self.raft.vote(rpc).await),
            RaftRequest::AppendEntries(rpc) => {
                RaftReply::AppendEntries(self.raft.append_entries(rpc).await)
            }
            RaftRequest::InstallSnapshot(rpc) => {
                RaftReply::InstallSnapshot(self.raft.install_snapshot(rpc).await)
            }
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> ConsensusResult<()> {
        let limit = self.rpc_timeout;
        let envelope = timeout(limit, read_message(&mut stream))
            .await
            .map_err(|_| ConsensusError::Timeout)??;
        let reply = self.handle(envelope).await;
        timeout(limit, write_message(&mut stream, &reply))
            .await
            .map_err(|_| ConsensusError::Timeout)??;
        Ok(())
    }
}

fn check_version(version: u8) -> Option<RaftReply> {
    if version == RAFT_PROTOCOL_VERSION {
        return None;
    }
    Some(RaftReply::Rejected {
        reason: format!(
            "protocol version {} not supported (expected {})",
            version, RAFT_PROTOCOL_VERSION
        ),
    })
}

pub(super) async fn accept_loop(
    server: Arc<PeerServer>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let server = server.clone();
                    tokio::spawn(
                        async move {
                            if let Err(e) = server.serve_connection(stream).await {
                                debug!(%remote, error = %e, "consensus connection failed");
                            }
                        }
                        .in_current_span(),
                    );
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept consensus connection");
                    sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("consensus listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use openraft::Vote;

    fn client(addr: String) -> PeerClient {
        PeerClient {
            target: 2,
            addr,
            from: "node-a".to_string(),
            fingerprint: 42,
            rpc_timeout: Duration::from_millis(500),
        }
    }

    fn vote_request() -> VoteRequest<NodeId> {
        VoteRequest {
            vote: Vote::new(3, 1),
            last_log_id: None,
        }
    }

    fn option() -> RPCOption {
        RPCOption::new(Duration::from_millis(500))
    }

    /// Answer one connection with `reply`, returning the received envelope
    async fn answer_once(reply: RaftReply) -> (String, tokio::task::JoinHandle<Envelope>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let envelope: Envelope = read_message(&mut stream).await.unwrap();
            write_message(&mut stream, &reply).await.unwrap();
            envelope
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_vote_reply_delivered() {
        let granted = VoteResponse {
            vote: Vote::new(3, 1),
            vote_granted: true,
            last_log_id: None,
        };
        let (addr, server) = answer_once(RaftReply::Vote(Ok(granted))).await;

        let response = client(addr).vote(vote_request(), option()).await.unwrap();
        assert!(response.vote_granted);

        let envelope = server.await.unwrap();
        assert_eq!(envelope.version, RAFT_PROTOCOL_VERSION);
        assert_eq!(envelope.from, "node-a");
        assert_eq!(envelope.fingerprint, 42);
        assert_eq!(envelope.request.type_name(), "Vote");
    }

    #[tokio::test]
    async fn test_rejected_reply_is_network_error() {
        let (addr, _server) = answer_once(RaftReply::Rejected {
            reason: "protocol version 9 not supported".to_string(),
        })
        .await;

        let err = client(addr).vote(vote_request(), option()).await.unwrap_err();
        assert!(matches!(err, RPCError::Network(_)));
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_network_error() {
        let (addr, _server) = answer_once(RaftReply::AppendEntries(Ok(
            AppendEntriesResponse::Success,
        )))
        .await;

        let err = client(addr).vote(vote_request(), option()).await.unwrap_err();
        assert!(matches!(err, RPCError::Network(_)));
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let err = client(addr).vote(vote_request(), option()).await.unwrap_err();
        assert!(matches!(err, RPCError::Unreachable(_)));
    }

    #[test]
    fn test_transport_error_classes() {
        let timeout: RPCError<NodeId, BasicNode, RaftError<NodeId>> =
            transport_error(ConsensusError::Timeout);
        assert!(matches!(timeout, RPCError::Unreachable(_)));

        let codec: RPCError<NodeId, BasicNode, RaftError<NodeId>> =
            transport_error(ConsensusError::FrameTooLarge(usize::MAX));
        assert!(matches!(codec, RPCError::Network(_)));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        assert!(check_version(RAFT_PROTOCOL_VERSION).is_none());
        let reply = check_version(RAFT_PROTOCOL_VERSION + 1).unwrap();
        assert!(matches!(reply, RaftReply::Rejected { reason } if reason.contains("expected")));
    }

    #[test]
    fn test_fingerprint_warning_recorded_once() {
        let check = FingerprintCheck::new(42);
        assert!(check.check("node-b", 7));
        assert!(check.check("node-c", 7));
        assert!(!check.check("node-b", 42));

        let seen = check.seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen.contains(&7));
    }
}
