//! Testing utilities and mock implementations
//!
//! Lets the node loops run without a radio, a server socket, or a probe.

pub mod mocks;

pub use mocks::*;

use crate::config::NodeConfig;
use crate::connection::WifiCredential;

/// Configuration with short timings for tests
pub fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node.device_id = "test-node".to_string();
    config.node.loop_delay_ms = 1;
    config.network.known = vec![WifiCredential {
        ssid: "9G".to_string(),
        password: "pw".to_string(),
    }];
    config.network.join_timeout_ms = 200;
    config.server.connect_timeout_ms = 200;
    config.server.heartbeat_interval_ms = 50;
    config.server.heartbeat_timeout_ms = 150;
    config.server.auth_key_env = None;
    config.serial.mirror_logs = false;
    config.controller.sync_retry_ms = 50;
    config
}
