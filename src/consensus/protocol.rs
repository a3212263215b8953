//! Consensus Protocol Messages
//!
//! Every RPC is one request frame and one response frame on a fresh TCP
//! connection. A frame is a 4-byte big-endian length followed by a JSON
//! payload. Requests travel in an [`Envelope`] that also carries the
//! sender's configuration fingerprint.

use openraft::error::{InstallSnapshotError, RaftError};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ConsensusError, ConsensusResult, NodeId, TypeConfig};

/// Protocol version for compatibility checking
pub const RAFT_PROTOCOL_VERSION: u8 = 2;

/// Largest payload accepted from a peer
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// A request plus who sent it
#[derive(Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    /// Configured id of the sending node
    pub from: String,
    /// Digest of the sender's shared settings
    pub fingerprint: u64,
    pub request: RaftRequest,
}

/// Raft RPCs sent to a peer
#[derive(Serialize, Deserialize)]
pub enum RaftRequest {
    Vote(VoteRequest<NodeId>),
    AppendEntries(AppendEntriesRequest<TypeConfig>),
    InstallSnapshot(InstallSnapshotRequest<TypeConfig>),
}

impl RaftRequest {
    /// Get the message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            RaftRequest::Vote(_) => "Vote",
            RaftRequest::AppendEntries(_) => "AppendEntries",
            RaftRequest::InstallSnapshot(_) => "InstallSnapshot",
        }
    }
}

/// Answers to [`RaftRequest`], carrying the remote raft result as is
#[derive(Serialize, Deserialize)]
pub enum RaftReply {
    Vote(Result<VoteResponse<NodeId>, RaftError<NodeId>>),
    AppendEntries(Result<AppendEntriesResponse<NodeId>, RaftError<NodeId>>),
    InstallSnapshot(
        Result<InstallSnapshotResponse<NodeId>, RaftError<NodeId, InstallSnapshotError>>,
    ),
    /// The request could not be handled at all
    Rejected { reason: String },
}

impl RaftReply {
    /// Get the message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            RaftReply::Vote(_) => "Vote",
            RaftReply::AppendEntries(_) => "AppendEntries",
            RaftReply::InstallSnapshot(_) => "InstallSnapshot",
            RaftReply::Rejected { .. } => "Rejected",
        }
    }
}

/// Frame a message with length prefix for TCP transmission
pub fn frame_message<T: Serialize>(msg: &T) -> ConsensusResult<Vec<u8>> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ConsensusError::FrameTooLarge(payload.len()));
    }
    let len = payload.len() as u32;

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);

    Ok(frame)
}

/// Read frame length from bytes (returns None if not enough data)
pub fn read_frame_length(data: &[u8]) -> Option<u32> {
    if data.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

/// Write one framed message and flush
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> ConsensusResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = frame_message(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message
pub async fn read_message<R, T>(reader: &mut R) -> ConsensusResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let len = read_frame_length(&header).unwrap_or_default() as usize;
    if len > MAX_FRAME_LEN {
        return Err(ConsensusError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}
