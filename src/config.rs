//! Node configuration
//!
//! Read once from TOML at startup. Every section has defaults, so an absent
//! file or absent keys give a working bench setup. The shared secret never
//! lives in the file; `server.auth_key_env` names the environment variable
//! holding it and it is resolved at runtime.

use crate::connection::{ConnectionSettings, WifiCredential, DEFAULT_DISCONNECT_DAMPING};
use crate::controller::ControllerSettings;
use crate::protocol::{SensorConfig, DEFAULT_HEADER_PREFIX};
use crate::router::Role;
use crate::transport::{ServerEndpoint, TransportKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Files tried, in order, when no path is given on the command line
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["soilbridge.toml", "config/soilbridge.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub network: NetworkSection,
    pub server: ServerSection,
    pub serial: SerialSection,
    pub controller: ControllerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeSection {
    /// Identity announced to the server (must match [A-Za-z0-9._:-]+)
    pub device_id: String,
    pub role: Role,
    /// Pause at the end of every loop iteration
    pub loop_delay_ms: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            device_id: "soilbridge".to_string(),
            role: Role::Bridge,
            loop_delay_ms: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkSection {
    pub join_timeout_ms: u64,
    /// Networks this node may join, strongest signal wins
    pub known: Vec<WifiCredential>,
    /// Name the host adapter reports when scanned
    pub host_ssid: String,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            join_timeout_ms: 10_000,
            known: vec![WifiCredential {
                ssid: "host".to_string(),
                password: String::new(),
            }],
            host_ssid: "host".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// WebSocket request path
    pub path: String,
    pub transport: TransportKind,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Environment variable containing the shared secret; `""` for none
    pub auth_key_env: Option<String>,
    pub header_prefix: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9453,
            path: "/".to_string(),
            transport: TransportKind::Tcp,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 10_000,
            auth_key_env: Some("SOILBRIDGE_AUTH_KEY".to_string()),
            header_prefix: DEFAULT_HEADER_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialSection {
    /// Serial device path; unset runs both roles in-process over a pipe
    pub device: Option<String>,
    pub baud_rate: u32,
    /// Mirror bridge diagnostics to the sensor node as log frames
    pub mirror_logs: bool,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: 9600,
            mirror_logs: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerSection {
    /// Defaults used until the server confirms a configuration
    pub offset: u32,
    pub low: u32,
    pub high: u32,
    pub interval_ms: u32,
    /// Full-scale raw reading of the probe input
    pub max_raw: u32,
    pub watering_check_ms: u64,
    /// How often an unconfirmed sensor node asks for its configuration
    pub sync_retry_ms: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        let defaults = SensorConfig::default();
        Self {
            offset: defaults.offset,
            low: defaults.low,
            high: defaults.high,
            interval_ms: defaults.interval_ms,
            max_raw: 1023,
            watering_check_ms: 100,
            sync_retry_ms: 5_000,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NodeConfig {
    /// Load and validate a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise the first default path that exists,
    /// otherwise built-in defaults
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = path {
            return Ok((Self::load_from_file(path)?, Some(path.to_path_buf())));
        }

        for candidate in DEFAULT_CONFIG_PATHS {
            let candidate = Path::new(candidate);
            if candidate.is_file() {
                return Ok((Self::load_from_file(candidate)?, Some(candidate.to_path_buf())));
            }
        }

        info!("No configuration file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok((config, None))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.node.device_id)?;

        if self.server.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "server.heartbeat_timeout_ms ({}) must not be shorter than \
                 heartbeat_interval_ms ({})",
                self.server.heartbeat_timeout_ms, self.server.heartbeat_interval_ms
            )));
        }
        if self.node.role == Role::Bridge && self.network.known.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "bridge role needs at least one [[network.known]] entry".to_string(),
            ));
        }
        if self.controller.interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "controller.interval_ms must be greater than zero".to_string(),
            ));
        }

        if !self.sensor_defaults().has_dead_zone() {
            warn!(
                low = self.controller.low,
                high = self.controller.high,
                "Default hysteresis band is empty; controller will not hold state"
            );
        }
        Ok(())
    }

    /// Shared secret from the environment. Empty when no variable is
    /// configured (absent or `""`); an error when the configured variable is
    /// missing.
    pub fn require_auth_key(&self) -> Result<String, ConfigError> {
        match self.server.auth_key_env.as_deref() {
            Some(name) if !name.is_empty() => {
                std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.to_string()))
            }
            _ => Ok(String::new()),
        }
    }

    pub fn sensor_defaults(&self) -> SensorConfig {
        SensorConfig {
            offset: self.controller.offset,
            low: self.controller.low,
            high: self.controller.high,
            interval_ms: self.controller.interval_ms,
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            max_raw: self.controller.max_raw,
            watering_check: Duration::from_millis(self.controller.watering_check_ms),
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            known_networks: self.network.known.clone(),
            join_timeout: Duration::from_millis(self.network.join_timeout_ms),
            connect_timeout: Duration::from_millis(self.server.connect_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(self.server.heartbeat_timeout_ms),
            disconnect_damping: DEFAULT_DISCONNECT_DAMPING,
        }
    }

    pub fn endpoint(&self) -> ServerEndpoint {
        ServerEndpoint {
            host: self.server.host.clone(),
            port: self.server.port,
            path: self.server.path.clone(),
        }
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.node.loop_delay_ms)
    }

    pub fn sync_retry(&self) -> Duration {
        Duration::from_millis(self.controller.sync_retry_ms)
    }

    /// Render as TOML with network passwords masked
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        for credential in &mut shown.network.known {
            if !credential.password.is_empty() {
                credential.password = "***".to_string();
            }
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

/// Validate device ID format
fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'));

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidDeviceId(format!(
            "Device ID '{device_id}' must match pattern [A-Za-z0-9._:-]+"
        )));
    }

    Ok(())
}
