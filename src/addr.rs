//! Leader address handling
//!
//! The consensus layer reports the current leader as `host:port`. Time-sync
//! followers need the bare host address to point their daemon at.

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

/// Failure to pull an IP address out of a consensus address string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("failed to parse IP address from '{0}'")]
    InvalidAddress(String),
}

/// Extract the bare IP address from a leader address.
///
/// Accepts `ip:port`, `[ipv6]:port` and a bare `ip`.
pub fn split_host(addr: &str) -> Result<IpAddr, ParseError> {
    let addr = addr.trim();
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return Ok(sock.ip());
    }

    let host = addr.trim_start_matches('[').trim_end_matches(']');
    host.parse::<IpAddr>()
        .map_err(|_| ParseError::InvalidAddress(addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;
    use test_case::test_case;

    #[test_case("10.0.0.5:8300", "10.0.0.5" ; "ipv4 with port")]
    #[test_case("10.0.0.5", "10.0.0.5" ; "bare ipv4")]
    #[test_case("[fd00::5]:8300", "fd00::5" ; "ipv6 with port")]
    #[test_case("fd00::5", "fd00::5" ; "bare ipv6")]
    #[test_case(" 10.0.0.7:1 ", "10.0.0.7" ; "surrounding whitespace")]
    fn test_split_host_ok(input: &str, expected: &str) {
        let expected: IpAddr = expected.parse().unwrap();
        assert_eq!(split_host(input).unwrap(), expected);
    }

    #[test_case("not-an-address" ; "hostname")]
    #[test_case("" ; "empty")]
    #[test_case("10.0.0:8300" ; "short ipv4")]
    #[test_case(":8300" ; "port only")]
    fn test_split_host_rejects(input: &str) {
        assert!(matches!(
            split_host(input),
            Err(ParseError::InvalidAddress(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_split_host_strips_any_port(a: u8, b: u8, c: u8, d: u8, port: u16) {
            let ip = Ipv4Addr::new(a, b, c, d);
            let parsed = split_host(&format!("{}:{}", ip, port)).unwrap();
            prop_assert_eq!(parsed, IpAddr::V4(ip));
        }
    }
}
