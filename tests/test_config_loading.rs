//! Configuration loading and validation tests
//!
//! Tests focus on what a node sees after loading: effective values, defaults
//! for absent keys, and the errors an operator gets for a bad file.

use soilbridge::config::{ConfigError, NodeConfig};
use soilbridge::error::NodeError;
use soilbridge::node::BridgeNode;
use soilbridge::protocol::SensorConfig;
use soilbridge::router::Role;
use soilbridge::testing::{MockNetwork, MockTransport};
use soilbridge::transport::{SerialLink, TransportKind};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{contents}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[node]
device_id = "greenhouse-1"
role = "bridge"

[[network.known]]
ssid = "greenhouse"
password = "hunter22"

[server]
host = "10.0.0.5"
port = 7000
transport = "ws"
path = "/nodes"

[controller]
offset = 300
low = 25
high = 65
interval_ms = 2000
"#,
    );

    let config = NodeConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.node.device_id, "greenhouse-1");
    assert_eq!(config.node.role, Role::Bridge);
    assert_eq!(config.network.known[0].ssid, "greenhouse");
    assert_eq!(config.server.transport, TransportKind::Websocket);
    assert_eq!(config.endpoint().socket_address(), "10.0.0.5:7000");
    assert_eq!(
        config.endpoint().websocket_url().unwrap().as_str(),
        "ws://10.0.0.5:7000/nodes"
    );
    assert_eq!(
        config.sensor_defaults(),
        SensorConfig {
            offset: 300,
            low: 25,
            high: 65,
            interval_ms: 2000,
        }
    );
}

#[test]
fn test_absent_sections_use_defaults() {
    let temp_file = write_config(
        r#"
[node]
role = "sensor"
"#,
    );

    let config = NodeConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.node.role, Role::Sensor);
    assert_eq!(config.sensor_defaults(), SensorConfig::default());
    assert_eq!(config.server.transport, TransportKind::Tcp);
    assert_eq!(config.server.header_prefix, "CO3006");
    assert_eq!(config.serial.baud_rate, 9600);
    assert!(config.serial.device.is_none());

    let connection = config.connection_settings();
    assert_eq!(connection.join_timeout, Duration::from_secs(10));
    assert_eq!(connection.heartbeat_interval, Duration::from_secs(5));
    assert_eq!(connection.heartbeat_timeout, Duration::from_secs(10));
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let temp_file = write_config("[node\ndevice_id = ");
    let result = NodeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_file_is_read_error() {
    let result = NodeConfig::load_from_file(std::path::Path::new("/nonexistent/soilbridge.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_bad_device_id_rejected() {
    let temp_file = write_config(
        r#"
[node]
device_id = "green house/1"
"#,
    );
    let result = NodeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidDeviceId(_))));
}

#[test]
fn test_heartbeat_timeout_shorter_than_interval_rejected() {
    let temp_file = write_config(
        r#"
[server]
heartbeat_interval_ms = 5000
heartbeat_timeout_ms = 1000
"#,
    );
    let result = NodeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_bridge_without_known_networks_rejected() {
    let temp_file = write_config(
        r#"
[node]
role = "bridge"

[network]
known = []
"#,
    );
    let result = NodeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_auth_key_resolved_from_environment() {
    let temp_file = write_config(
        r#"
[server]
auth_key_env = "SOILBRIDGE_TEST_AUTH_KEY_PRESENT"
"#,
    );
    std::env::set_var("SOILBRIDGE_TEST_AUTH_KEY_PRESENT", "key-16888888");

    let config = NodeConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.require_auth_key().unwrap(), "key-16888888");
}

#[tokio::test]
async fn test_bridge_without_secret_in_environment_is_refused() {
    let temp_file = write_config(
        r#"
[node]
role = "bridge"

[server]
auth_key_env = "SOILBRIDGE_TEST_AUTH_KEY_ABSENT"
"#,
    );
    let config = NodeConfig::load_from_file(temp_file.path()).unwrap();
    assert!(matches!(
        config.require_auth_key(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "SOILBRIDGE_TEST_AUTH_KEY_ABSENT"
    ));

    // The bridge never starts with an empty secret
    let (bridge_end, _sensor_end) = tokio::io::duplex(64);
    let bridge = BridgeNode::new(
        &config,
        Box::new(MockNetwork::single("9G")),
        Box::new(MockTransport::new()),
        SerialLink::new(bridge_end),
    );
    assert!(matches!(
        bridge.err(),
        Some(NodeError::Config(ConfigError::EnvVarNotFound(_)))
    ));
}

#[test]
fn test_empty_secret_variable_name_disables_secret() {
    let temp_file = write_config(
        r#"
[server]
auth_key_env = ""
"#,
    );
    let config = NodeConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.require_auth_key().unwrap(), "");
}

#[test]
fn test_redacted_rendering_hides_passwords() {
    let temp_file = write_config(
        r#"
[[network.known]]
ssid = "greenhouse"
password = "hunter22"
"#,
    );
    let config = NodeConfig::load_from_file(temp_file.path()).unwrap();
    let rendered = config.to_redacted_toml().unwrap();

    assert!(rendered.contains("greenhouse"));
    assert!(!rendered.contains("hunter22"));

    // The rendering is itself a loadable configuration
    let reparsed: NodeConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(reparsed.node, config.node);
}
