//! Pure connection state management for the upstream MQTT client
//!
//! This module contains pure functions for connection state management,
//! reconnection settings, client identifiers and option building.

use crate::config::MqttSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Connection state for the upstream MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Not connected, with reason
    Disconnected(String),
    /// Initial state - first connection attempt in flight
    Connecting,
    /// ConnAck received, operations are allowed
    Connected,
    /// Connection lost, waiting for retry (attempt count)
    Reconnecting(u32),
}

impl ConnectionState {
    /// Only a connected link accepts subscribe and publish requests
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Short label used by health endpoints and logs
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected(_) => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting(_) => "reconnecting",
        }
    }
}

/// Reconnection configuration
///
/// Retries use one fixed interval; there is no backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delay before every attempt in milliseconds
    pub interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            interval_ms: 1000,
        }
    }
}

impl ReconnectConfig {
    pub fn from_section(config: &MqttSection) -> Self {
        Self {
            max_attempts: None,
            interval_ms: config.reconnect_interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Upstream MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("broker not ready")]
    NotReady,
    #[error("{reason}")]
    SubscriptionFailed { topic: String, reason: String },
    #[error("{reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
}

impl MqttError {
    /// Topic the failed operation targeted, if any
    pub fn topic(&self) -> Option<&str> {
        match self {
            MqttError::SubscriptionFailed { topic, .. } | MqttError::PublishFailed { topic, .. } => {
                Some(topic)
            }
            _ => None,
        }
    }
}

/// Generate a client identifier: `{prefix}-{8 hex chars}`
pub fn generate_client_id(prefix: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &random[..8])
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let (_, host, port) = config
        .broker_address()
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if config.uses_tls() {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    // No session state survives a restart
    mqtt_options.set_clean_start(true);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

    Ok(mqtt_options)
}
