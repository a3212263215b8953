//! VIP Configuration

use std::net::IpAddr;

use ipnet::IpNet;
use serde::Deserialize;

use super::ConfigError;

/// Floating address configuration (`[network]`)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VipConfig {
    /// Virtual IP, either a bare address or `address/prefix`
    pub vip: String,
    /// Interface the VIP is claimed on
    pub interface: String,
    /// Prefix length used when `vip` carries none (24 for IPv4, 64 for IPv6)
    pub prefix_len: Option<u8>,
}

impl VipConfig {
    /// The VIP with its prefix length applied
    pub fn vip_net(&self) -> Result<IpNet, ConfigError> {
        let raw = self.vip.trim();
        if raw.contains('/') {
            return raw.parse::<IpNet>().map_err(|_| {
                ConfigError::Validation(format!("network.vip '{}' is not a valid address", raw))
            });
        }

        let ip: IpAddr = raw.parse().map_err(|_| {
            ConfigError::Validation(format!("network.vip '{}' is not a valid address", raw))
        })?;
        let prefix = self.prefix_len.unwrap_or(match ip {
            IpAddr::V4(_) => 24,
            IpAddr::V6(_) => 64,
        });
        IpNet::new(ip, prefix).map_err(|_| {
            ConfigError::Validation(format!(
                "network.prefix_len {} is out of range for {}",
                prefix, ip
            ))
        })
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.vip.trim().is_empty() {
            return Err(ConfigError::Validation(
                "network.vip is required".to_string(),
            ));
        }
        self.vip_net()?;

        if self.interface.trim().is_empty() {
            return Err(ConfigError::Validation(
                "network.interface is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vip(vip: &str, prefix_len: Option<u8>) -> VipConfig {
        VipConfig {
            vip: vip.to_string(),
            interface: "eth0".to_string(),
            prefix_len,
        }
    }

    #[test]
    fn test_bare_ipv4_gets_default_prefix() {
        let net = vip("10.0.0.100", None).vip_net().unwrap();
        assert_eq!(net.to_string(), "10.0.0.100/24");
        assert_eq!(net.addr().to_string(), "10.0.0.100");
    }

    #[test]
    fn test_explicit_prefix_in_address() {
        let net = vip("10.0.0.100/32", Some(16)).vip_net().unwrap();
        assert_eq!(net.prefix_len(), 32);
    }

    #[test]
    fn test_prefix_len_field() {
        let net = vip("10.0.0.100", Some(16)).vip_net().unwrap();
        assert_eq!(net.to_string(), "10.0.0.100/16");
    }

    #[test]
    fn test_ipv6_default_prefix() {
        let net = vip("fd00::100", None).vip_net().unwrap();
        assert_eq!(net.prefix_len(), 64);
    }

    #[test]
    fn test_prefix_out_of_range() {
        assert!(vip("10.0.0.100", Some(33)).vip_net().is_err());
    }

    #[test]
    fn test_malformed_vip() {
        assert!(vip("10.0.0", None).validate().is_err());
        assert!(vip("", None).validate().is_err());
    }

    #[test]
    fn test_interface_required() {
        let mut config = vip("10.0.0.100", None);
        config.interface.clear();
        assert!(config.validate().is_err());
    }
}
