//! Configuration for the aircon bridge
//!
//! Loaded once at startup from a TOML file. Broker credentials are never
//! stored in the file; `username_env` / `password_env` name the environment
//! variables that hold them and are resolved when the client connects.

use crate::protocol::{canonicalize_prefix, validate_device_name};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Files tried in order when no `--config` is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["aircon-bridge.toml", "config/aircon-bridge.toml"];

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub bridge: BridgeSection,
    pub mqtt: MqttSection,
    pub gateway: GatewaySection,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub inverters: Vec<InverterConfig>,
}

/// Polling behaviour and topic layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// Root of every published and subscribed topic
    pub topic_prefix: String,
    /// Seconds between poll iterations
    pub interval_secs: u64,
    /// Upper bound for a single gateway query or apply
    #[serde(default = "default_device_timeout")]
    pub device_timeout_secs: u64,
}

impl BridgeSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }
}

fn default_device_timeout() -> u64 {
    10
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port (`mqtt://` or `mqtts://`)
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long connect and reconnect wait for ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl MqttSection {
    /// Get MQTT username from environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_deref())
    }

    /// Get MQTT password from environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_deref())
    }
}

fn default_client_id() -> String {
    "aircon-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

/// Local HTTP API of the aircon units
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySection {
    /// Operator id registered on every unit
    pub operator_id: String,
    /// Identifies this bridge to the units
    #[serde(default = "default_device_id")]
    pub device_id: String,
    /// Sent with `register`
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl GatewaySection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_device_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| "aircon-bridge".to_string())
}

fn default_timezone() -> String {
    std::fs::read_to_string("/etc/timezone")
        .ok()
        .map(|tz| tz.trim().to_string())
        .filter(|tz| !tz.is_empty())
        .unwrap_or_else(|| "UTC".to_string())
}

fn default_gateway_port() -> u16 {
    51443
}

fn default_request_timeout() -> u64 {
    5
}

/// Optional rolling log file next to the console output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    pub directory: PathBuf,
    #[serde(default = "default_log_file_name")]
    pub file_name: String,
}

fn default_log_file_name() -> String {
    "aircon-bridge.log".to_string()
}

/// One aircon unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InverterConfig {
    /// Topic level under the prefix; unique across inverters
    pub name: String,
    /// Host name or IP address of the unit
    pub address: String,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No config file found (tried {0})")]
    NotFound(String),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid inverter name '{name}': {reason}")]
    InvalidInverterName { name: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path: explicit path wins, then the default locations
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.is_file())
            .ok_or_else(|| ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", ")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if canonicalize_prefix(&self.bridge.topic_prefix).is_empty() {
            return Err(ConfigError::InvalidConfig(
                "bridge.topic_prefix must not be empty".to_string(),
            ));
        }

        if self.bridge.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "bridge.interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.bridge.device_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "bridge.device_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Url::parse(&self.mqtt.broker_url).map_err(|e| {
            ConfigError::InvalidConfig(format!(
                "mqtt.broker_url '{}' is not a valid URL: {e}",
                self.mqtt.broker_url
            ))
        })?;

        if self.gateway.operator_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "gateway.operator_id must not be empty".to_string(),
            ));
        }

        if self.inverters.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one [[inverters]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for inverter in &self.inverters {
            validate_device_name(&inverter.name).map_err(|e| {
                ConfigError::InvalidInverterName {
                    name: inverter.name.clone(),
                    reason: e.to_string(),
                }
            })?;

            if !seen.insert(inverter.name.as_str()) {
                return Err(ConfigError::InvalidInverterName {
                    name: inverter.name.clone(),
                    reason: "duplicate name".to_string(),
                });
            }

            if inverter.address.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "inverter '{}' has an empty address",
                    inverter.name
                )));
            }
        }

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[bridge]
topic_prefix = "klima"
interval_secs = 30

[mqtt]
broker_url = "mqtt://localhost:1883"

[gateway]
operator_id = "test-operator"
device_id = "test-bridge"
timezone = "UTC"

[[inverters]]
name = "Lounge"
address = "192.168.1.50"

[[inverters]]
name = "Office"
address = "192.168.1.51"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Helper method to get environment variable with consistent error handling
fn get_env_var_optional(env_var_name: Option<&str>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::test_config();
        assert!(config.validate().is_ok());

        assert_eq!(config.bridge.device_timeout_secs, 10);
        assert_eq!(config.mqtt.client_id, "aircon-bridge");
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.connect_timeout_secs, 10);
        assert_eq!(config.gateway.port, 51443);
        assert_eq!(config.gateway.request_timeout_secs, 5);
        assert!(config.logging.is_none());
        assert_eq!(config.inverters.len(), 2);
    }

    #[test]
    fn test_rejects_empty_inverter_list() {
        let mut config = BridgeConfig::test_config();
        config.inverters.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut config = BridgeConfig::test_config();
        config.inverters[1].name = "Lounge".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInverterName { .. })
        ));
    }

    #[test]
    fn test_rejects_wildcards_in_names() {
        for name in ["Bed/Room", "Lounge+", "#", ""] {
            let mut config = BridgeConfig::test_config();
            config.inverters[0].name = name.to_string();
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidInverterName { .. })),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_zero_interval_and_empty_prefix() {
        let mut config = BridgeConfig::test_config();
        config.bridge.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::test_config();
        config.bridge.topic_prefix = "//".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_broker_url() {
        let mut config = BridgeConfig::test_config();
        config.mqtt.broker_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_credentials() {
        let mut config = BridgeConfig::test_config();
        config.mqtt.username_env = Some("AIRCON_BRIDGE_TEST_USER".to_string());
        config.mqtt.password_env = Some("AIRCON_BRIDGE_TEST_UNSET_PASSWORD".to_string());

        std::env::set_var("AIRCON_BRIDGE_TEST_USER", "bridge");
        assert_eq!(config.mqtt.username(), Some("bridge".to_string()));
        assert_eq!(config.mqtt.password(), None);
        std::env::remove_var("AIRCON_BRIDGE_TEST_USER");
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        let explicit = Path::new("/tmp/custom.toml");
        assert_eq!(
            BridgeConfig::locate(Some(explicit)).unwrap(),
            PathBuf::from("/tmp/custom.toml")
        );
    }
}
