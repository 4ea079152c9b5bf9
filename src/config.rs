//! Configuration system for the MQTT WebSocket bridge
//!
//! Configuration comes from an optional TOML file. Every field has a default,
//! and a handful of environment variables override the file so the bridge can
//! run in a container with no file at all.
//!
//! | Variable | Overrides |
//! |---|---|
//! | `PORT` | `server.port` |
//! | `MQTT_BROKER_HOST` | host part of `mqtt.broker_url` |
//! | `MQTT_BROKER_PORT` | port part of `mqtt.broker_url` |

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Main bridge configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub mqtt: MqttSection,
}

/// HTTP/WebSocket listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port to bind
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path segment of the WebSocket upgrade endpoint
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_ws_path() -> String {
    "mqtt".to_string()
}

/// Upstream MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Prefix of the generated client identifier
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Fixed delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// MQTT keep alive in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            username_env: None,
            password_env: None,
            client_id_prefix: default_client_id_prefix(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_client_id_prefix() -> String {
    "mqtt-proxy".to_string()
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

fn default_keep_alive_secs() -> u64 {
    60
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: BridgeConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = BridgeConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORT`, `MQTT_BROKER_HOST` and `MQTT_BROKER_PORT` from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_port("PORT", &port)?;
        }

        let broker_host = lookup("MQTT_BROKER_HOST");
        let broker_port = lookup("MQTT_BROKER_PORT")
            .map(|value| parse_port("MQTT_BROKER_PORT", &value))
            .transpose()?;

        if broker_host.is_some() || broker_port.is_some() {
            let (scheme, host, port) = self.mqtt.broker_address()?;
            let host = broker_host.unwrap_or(host);
            let port = broker_port.unwrap_or(port);
            self.mqtt.broker_url = format!("{scheme}://{host}:{port}");
        }

        Ok(())
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.port must be greater than 0".to_string(),
            ));
        }

        if self.server.ws_path.trim_matches('/').is_empty() {
            return Err(ConfigError::InvalidConfig(
                "server.ws_path must not be empty".to_string(),
            ));
        }

        if self.server.ws_path.trim_matches('/').contains('/') {
            return Err(ConfigError::InvalidConfig(
                "server.ws_path must be a single path segment".to_string(),
            ));
        }

        if self.mqtt.reconnect_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect_interval_ms must be greater than 0".to_string(),
            ));
        }

        self.mqtt.broker_address()?;
        Ok(())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        self.mqtt.username()
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        self.mqtt.password()
    }
}

impl ServerSection {
    /// WebSocket path without surrounding slashes
    pub fn ws_path_segment(&self) -> &str {
        self.ws_path.trim_matches('/')
    }
}

impl MqttSection {
    /// Split the broker URL into `(scheme, host, port)`
    pub fn broker_address(&self) -> Result<(String, String, u16), ConfigError> {
        let url = Url::parse(&self.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;

        let scheme = url.scheme().to_string();
        if scheme != "mqtt" && scheme != "mqtts" && scheme != "tcp" {
            return Err(ConfigError::InvalidBrokerUrl(self.broker_url.clone()));
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?
            .to_string();
        let port = url
            .port()
            .unwrap_or(if scheme == "mqtts" { 8883 } else { 1883 });

        Ok((scheme, host, port))
    }

    /// Whether the connection should use TLS
    pub fn uses_tls(&self) -> bool {
        self.broker_url.starts_with("mqtts://")
    }

    pub fn username(&self) -> Option<String> {
        self.username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    pub fn password(&self) -> Option<String> {
        self.password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }
}

fn parse_port(name: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|port| *port > 0)
        .ok_or_else(|| ConfigError::InvalidEnvVar {
            name: name.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.ws_path, "mqtt");
        assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
        assert_eq!(config.mqtt.client_id_prefix, "mqtt-proxy");
        assert_eq!(config.mqtt.reconnect_interval_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let toml_content = r#"
[server]
port = 8080

[mqtt]
broker_url = "mqtt://broker.local:1884"
username_env = "MQTT_USERNAME"
"#;

        let config: BridgeConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.ws_path, "mqtt");
        assert_eq!(config.mqtt.username_env.as_deref(), Some("MQTT_USERNAME"));
        assert_eq!(config.mqtt.password_env, None);
        assert_eq!(config.mqtt.reconnect_interval_ms, 1000);
    }

    #[test]
    fn test_broker_address() {
        let mut mqtt = MqttSection::default();
        assert_eq!(
            mqtt.broker_address().unwrap(),
            ("mqtt".to_string(), "localhost".to_string(), 1883)
        );

        mqtt.broker_url = "mqtts://secure.example.com".to_string();
        assert_eq!(mqtt.broker_address().unwrap().2, 8883);
        assert!(mqtt.uses_tls());

        mqtt.broker_url = "invalid-url".to_string();
        assert!(matches!(
            mqtt.broker_address(),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));

        mqtt.broker_url = "http://localhost:1883".to_string();
        assert!(mqtt.broker_address().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BridgeConfig::default();
        config
            .apply_overrides_from(lookup_from(&[
                ("PORT", "4000"),
                ("MQTT_BROKER_HOST", "mosquitto"),
                ("MQTT_BROKER_PORT", "1885"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.mqtt.broker_url, "mqtt://mosquitto:1885");
    }

    #[test]
    fn test_env_override_host_only_keeps_port() {
        let mut config = BridgeConfig::default();
        config.mqtt.broker_url = "mqtt://localhost:1999".to_string();
        config
            .apply_overrides_from(lookup_from(&[("MQTT_BROKER_HOST", "broker")]))
            .unwrap();
        assert_eq!(config.mqtt.broker_url, "mqtt://broker:1999");
    }

    #[test]
    fn test_env_override_invalid_port() {
        let mut config = BridgeConfig::default();
        let result = config.apply_overrides_from(lookup_from(&[("PORT", "not-a-port")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));

        let result = config.apply_overrides_from(lookup_from(&[("MQTT_BROKER_PORT", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = BridgeConfig::default();
        config.server.ws_path = "/".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        let mut config = BridgeConfig::default();
        config.server.ws_path = "api/mqtt".to_string();
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.mqtt.reconnect_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ws_path_segment_trims_slashes() {
        let server = ServerSection {
            ws_path: "/mqtt/".to_string(),
            ..Default::default()
        };
        assert_eq!(server.ws_path_segment(), "mqtt");
    }

    #[test]
    fn test_config_serializes_back_to_toml() {
        let config = BridgeConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: BridgeConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
