//! chrony configuration templates

use std::fmt::Write;
use std::net::IpAddr;

/// Directives shared by both roles, after the `server` lines
pub const DIRECTIVES: &str = "\
allow all
stratumweight 0
driftfile /var/lib/chrony/drift
rtcsync
makestep 10 3
bindcmdaddress 127.0.0.1
bindcmdaddress ::1
keyfile /etc/chrony.keys
commandkey 1
generatecommandkey
noclientlog
logchange 0.5
logdir /var/log/chrony
local stratum 10
";

/// Leader: one `server` line per upstream, then the shared block.
///
/// An empty upstream list makes this node the time authority.
pub fn leader(servers: &[IpAddr]) -> String {
    let mut out = String::with_capacity(DIRECTIVES.len() + servers.len() * 32);
    for server in servers {
        let _ = writeln!(out, "server {} iburst", server);
    }
    out.push_str(DIRECTIVES);
    out
}

/// Follower: sync from the leader only
pub fn follower(leader_ip: &str) -> String {
    let mut out = String::with_capacity(DIRECTIVES.len() + 32);
    let _ = writeln!(out, "server {} iburst", leader_ip);
    out.push_str(DIRECTIVES);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_leader_with_upstreams() {
        let servers: Vec<IpAddr> = vec![
            "192.168.1.1".parse().unwrap(),
            "192.168.1.2".parse().unwrap(),
        ];
        let rendered = leader(&servers);
        assert_eq!(
            rendered,
            format!(
                "server 192.168.1.1 iburst\nserver 192.168.1.2 iburst\n{}",
                DIRECTIVES
            )
        );
    }

    #[test]
    fn test_leader_internal() {
        assert_eq!(leader(&[]), DIRECTIVES);
    }

    #[test]
    fn test_follower() {
        let rendered = follower("10.0.0.10");
        assert!(rendered.starts_with("server 10.0.0.10 iburst\nallow all\n"));
        assert!(rendered.ends_with("local stratum 10\n"));
        assert_eq!(rendered.lines().count(), 15);
    }
}
