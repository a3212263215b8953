//! Config module tests

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;

const THREE_NODES: &str = r#"
[raft]
id = "node-a"
bind = "10.0.0.10:8300"

[[raft.peers]]
id = "node-a"
addr = "10.0.0.10:8300"

[[raft.peers]]
id = "node-b"
addr = "10.0.0.11:8300"

[[raft.peers]]
id = "node-c"
addr = "10.0.0.12:8300"

[network]
vip = "10.0.0.100"
interface = "eth0"

[ntp]
mode = "external"
servers = ["192.168.1.1", "192.168.1.2"]
"#;

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("FLOATD_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${FLOATD_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("FLOATD_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("FLOATD_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${FLOATD_TEST_VAR_UNSET:-eth1}\"");
    assert_eq!(result, "value = \"eth1\"");
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(THREE_NODES).unwrap();
    assert_eq!(config.raft.node_id(), "node-a");
    assert_eq!(config.raft.peers.len(), 3);
    assert_eq!(config.raft.peers[2].id, "node-c");
    assert_eq!(config.network.vip_net().unwrap().to_string(), "10.0.0.100/24");
    assert_eq!(config.ntp.mode, TimeSyncMode::External);
    assert_eq!(config.ntp.servers.len(), 2);
    assert_eq!(config.manager.tick_interval, Duration::from_secs(1));
    assert_eq!(config.log.format, LogFormat::Compact);
    assert!(!config.metrics.enabled);
}

#[test]
fn test_parse_durations() {
    let content = format!(
        "{}\n[manager]\ntick_interval = \"500ms\"\n",
        THREE_NODES.replace(
            "bind = \"10.0.0.10:8300\"",
            "bind = \"10.0.0.10:8300\"\nheartbeat_interval = \"100ms\"\nelection_timeout = \"2s\""
        )
    );
    let config = Config::parse(&content).unwrap();
    assert_eq!(config.manager.tick_interval, Duration::from_millis(500));
    assert_eq!(config.raft.heartbeat_interval, Duration::from_millis(100));
    assert_eq!(config.raft.election_timeout, Duration::from_secs(2));
}

#[test]
fn test_invalid_mode() {
    let content = THREE_NODES.replace("mode = \"external\"", "mode = \"gps\"");
    assert!(matches!(Config::parse(&content), Err(ConfigError::Parse(_))));
}

#[test]
fn test_malformed_vip_is_fatal() {
    let content = THREE_NODES.replace("10.0.0.100", "10.0.0.300");
    assert!(matches!(
        Config::parse(&content),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_malformed_time_server_is_fatal() {
    let content = THREE_NODES.replace("192.168.1.2", "ntp.example.com");
    assert!(matches!(
        Config::parse(&content),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_zero_tick_rejected() {
    let content = format!("{}\n[manager]\ntick_interval = \"0s\"\n", THREE_NODES);
    assert!(Config::parse(&content).is_err());
}

#[test]
fn test_load_from_file_with_env_substitution() {
    std::env::set_var("FLOATD_TEST_IFACE", "bond0");
    let file = write_temp(&THREE_NODES.replace("\"eth0\"", "\"${FLOATD_TEST_IFACE}\""));

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.network.interface, "bond0");
    assert_eq!(config.ntp.config_path, PathBuf::from("/etc/chrony.conf"));
    assert_eq!(config.raft.heartbeat_interval, Duration::from_millis(200));

    std::env::remove_var("FLOATD_TEST_IFACE");
}

#[test]
fn test_env_overrides_file_value() {
    std::env::set_var("FLOATD__NETWORK__VIP", "10.0.0.200/24");
    let file = write_temp(THREE_NODES);

    let result = Config::load(file.path());
    std::env::remove_var("FLOATD__NETWORK__VIP");

    let config = result.unwrap();
    assert_eq!(config.network.vip, "10.0.0.200/24");
    assert_eq!(config.network.interface, "eth0");
}

#[test]
fn test_load_missing_file() {
    let err = Config::load("/nonexistent/floatd.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_discover_explicit_path() {
    let file = write_temp(THREE_NODES);
    let (config, used) = Config::discover(Some(file.path())).unwrap();
    assert_eq!(used.as_deref(), Some(file.path()));
    assert_eq!(config.network.interface, "eth0");
}

#[test]
fn test_search_paths_order() {
    let paths = Config::search_paths();
    assert_eq!(
        paths.last().unwrap(),
        &PathBuf::from("/etc/floatd/floatd.toml")
    );
    assert!(paths.contains(&PathBuf::from("./floatd.toml")));
}

#[test]
fn test_fingerprint_tracks_shared_settings() {
    let a = Config::parse(THREE_NODES).unwrap();

    let mut b = a.clone();
    b.raft.id = Some("node-b".to_string());
    b.network.interface = "ens3".to_string();
    assert_eq!(a.fingerprint(), b.fingerprint());

    b.network.vip = "10.0.0.101".to_string();
    assert_ne!(a.fingerprint(), b.fingerprint());

    let mut c = a.clone();
    c.ntp.mode = TimeSyncMode::Internal;
    assert_ne!(a.fingerprint(), c.fingerprint());
}
