//! Network Module
//!
//! Ownership of the floating address on a local interface. The manager only
//! sees the [`NetworkManager`] capability; [`VipLink`] implements it with
//! iproute2 and arping.

use async_trait::async_trait;
use ipnet::IpNet;
use thiserror::Error;

use crate::exec::CommandError;

mod link;

pub use link::{parse_addresses, VipLink};

/// Network adapter errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid VIP: {0}")]
    InvalidAddress(String),

    #[error("interface '{interface}' not found: {source}")]
    InterfaceNotFound {
        interface: String,
        #[source]
        source: CommandError,
    },

    #[error("failed to {op} {ip} on {interface}: {source}")]
    Command {
        op: &'static str,
        ip: IpNet,
        interface: String,
        #[source]
        source: CommandError,
    },
}

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Claim, release and check of the single floating address.
///
/// Every operation is idempotent with respect to the end state and safe to
/// call from both manager loops at once.
#[async_trait]
pub trait NetworkManager: Send + Sync {
    /// The VIP with its prefix
    fn address(&self) -> IpNet;

    /// Interface the VIP lives on
    fn interface(&self) -> &str;

    /// Whether the exact address and prefix are assigned to the interface
    async fn is_present(&self) -> NetworkResult<bool>;

    /// Assign the VIP if absent. Returns whether anything changed.
    async fn add(&self) -> NetworkResult<bool>;

    /// Remove the VIP if present. Returns whether anything changed.
    async fn remove(&self) -> NetworkResult<bool>;

    /// Tell the segment this host now owns the address
    async fn announce(&self) -> NetworkResult<()>;
}
