//! iproute2-backed VIP adapter

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::VipConfig;
use crate::exec::{CommandError, CommandRunner};

use super::{NetworkError, NetworkManager, NetworkResult};

/// The VIP on one named interface
pub struct VipLink {
    net: IpNet,
    interface: String,
    runner: Arc<dyn CommandRunner>,
    /// Serializes check-then-act between the two loops
    guard: Mutex<()>,
}

impl VipLink {
    /// Build from configuration, verifying the interface exists
    pub async fn from_config(
        config: &VipConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> NetworkResult<Self> {
        let net = config
            .vip_net()
            .map_err(|e| NetworkError::InvalidAddress(e.to_string()))?;
        Self::open(net, config.interface.trim(), runner).await
    }

    /// Bind `net` to `interface`, verifying the interface exists
    pub async fn open(
        net: IpNet,
        interface: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> NetworkResult<Self> {
        let interface = interface.into();
        runner
            .run("ip", &["link", "show", "dev", &interface])
            .await
            .map_err(|source| NetworkError::InterfaceNotFound {
                interface: interface.clone(),
                source,
            })?;

        debug!(ip = %net, link = %interface, "VIP adapter ready");
        Ok(Self {
            net,
            interface,
            runner,
            guard: Mutex::new(()),
        })
    }

    async fn present(&self) -> NetworkResult<bool> {
        let output = self
            .runner
            .run("ip", &["-o", "addr", "show", "dev", &self.interface])
            .await
            .map_err(|source| {
                let err = self.command_error("list", source);
                warn!(
                    ip = %self.net,
                    link = %self.interface,
                    error = %err,
                    "failed to list addresses"
                );
                err
            })?;
        Ok(parse_addresses(&output).contains(&self.net))
    }

    fn command_error(&self, op: &'static str, source: CommandError) -> NetworkError {
        NetworkError::Command {
            op,
            ip: self.net,
            interface: self.interface.clone(),
            source,
        }
    }

    async fn change(&self, op: &'static str, verb: &str) -> NetworkResult<()> {
        let cidr = self.net.to_string();
        match self
            .runner
            .run("ip", &["addr", verb, &cidr, "dev", &self.interface])
            .await
        {
            Ok(_) => {
                info!(ip = %self.net, link = %self.interface, "{} VIP", op);
                Ok(())
            }
            Err(source) => {
                let err = self.command_error(op, source);
                warn!(ip = %self.net, link = %self.interface, error = %err, "VIP {} failed", op);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl NetworkManager for VipLink {
    fn address(&self) -> IpNet {
        self.net
    }

    fn interface(&self) -> &str {
        &self.interface
    }

    async fn is_present(&self) -> NetworkResult<bool> {
        let _guard = self.guard.lock().await;
        self.present().await
    }

    async fn add(&self) -> NetworkResult<bool> {
        let _guard = self.guard.lock().await;
        if self.present().await? {
            debug!(ip = %self.net, link = %self.interface, "VIP already present");
            return Ok(false);
        }
        self.change("add", "add").await?;
        Ok(true)
    }

    async fn remove(&self) -> NetworkResult<bool> {
        let _guard = self.guard.lock().await;
        if !self.present().await? {
            debug!(ip = %self.net, link = %self.interface, "VIP already absent");
            return Ok(false);
        }
        self.change("remove", "del").await?;
        Ok(true)
    }

    async fn announce(&self) -> NetworkResult<()> {
        let ip = match self.net.addr() {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(_) => {
                debug!(ip = %self.net, link = %self.interface, "no gratuitous ARP for IPv6");
                return Ok(());
            }
        };

        match self
            .runner
            .run("arping", &["-U", "-c", "1", "-I", &self.interface, &ip])
            .await
        {
            Ok(_) => {
                info!(ip = %self.net, link = %self.interface, "sent gratuitous ARP");
                Ok(())
            }
            Err(source) => {
                let err = self.command_error("announce", source);
                warn!(
                    ip = %self.net,
                    link = %self.interface,
                    error = %err,
                    "gratuitous ARP failed"
                );
                Err(err)
            }
        }
    }
}

/// Addresses in `ip -o addr show` output
pub fn parse_addresses(output: &str) -> Vec<IpNet> {
    let mut addrs = Vec::new();
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "inet" || token == "inet6" {
                if let Some(net) = tokens.next().and_then(|t| t.parse::<IpNet>().ok()) {
                    addrs.push(net);
                }
            }
        }
    }
    addrs
}
