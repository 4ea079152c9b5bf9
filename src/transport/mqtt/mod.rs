//! Upstream MQTT client for the bridge
//!
//! This module keeps pure logic apart from I/O so most of it can be tested
//! without a broker.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, options and client identifiers
//! - [`message_handler`] - Pure event routing and the router hand-off
//! - [`health_monitor`] - Pure reconnection decisions and state transitions
//! - [`client`] - Impure I/O operations and the connection supervisor
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_ws_bridge::config::MqttSection;
//! use mqtt_ws_bridge::transport::mqtt::MqttClient;
//! use tokio::sync::mpsc;
//!
//! # tokio_test::block_on(async {
//! let (tx, _rx) = mpsc::channel(1024);
//! let client = MqttClient::new(MqttSection::default())?;
//! client.set_message_sender(tx).await;
//! client.start()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{generate_client_id, ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
