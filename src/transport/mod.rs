//! Upstream broker transport
//!
//! This module provides the broker abstraction the bridge talks to and its
//! MQTT implementation. Sessions and the router only see [`Broker`], which
//! keeps them testable against a mock.

use crate::transport::mqtt::ConnectionState;

pub mod mqtt;

/// A message delivered by the upstream broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Receive time in epoch milliseconds
    pub received_at: i64,
}

impl BrokerMessage {
    /// Payload decoded as text, replacing invalid UTF-8 sequences
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Broker trait for the single shared upstream connection
///
/// Subscribe and publish are gated on readiness and fail fast while the link
/// is down. Unsubscribe is best-effort and never reports failure.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether the upstream connection currently accepts operations
    fn is_ready(&self) -> bool;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Subscribe the shared connection to a topic filter
    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Drop a topic filter from the shared connection
    async fn unsubscribe(&self, topic: &str);

    /// Publish a payload at most once
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
