//! MQTT WebSocket bridge
//!
//! Browser clients speak a small JSON protocol over a WebSocket; the bridge
//! multiplexes their subscriptions and publishes onto a single upstream MQTT
//! connection and fans broker messages back out to every interested client.
//!
//! # Overview
//!
//! - [`protocol`] - Client envelopes, topic matching and the light payload
//! - [`transport`] - The upstream broker abstraction and its MQTT client
//! - [`bridge`] - Client registry, message router and per-connection sessions
//! - [`server`] - The warp WebSocket endpoint and HTTP server
//! - [`observability`] - Logging, metrics and health endpoints
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_ws_bridge::protocol::{topic_matches, InboundFrame, OutboundEnvelope, TopicBuilder};
//!
//! let pattern = TopicBuilder::all_lights_pattern();
//! assert!(topic_matches(&pattern, &TopicBuilder::build_light_topic("kitchen")));
//!
//! let frame = InboundFrame::parse(r#"{"type":"subscribe","topic":"smarthome/+/light"}"#);
//! assert!(matches!(frame, InboundFrame::Request(_)));
//!
//! let reply = OutboundEnvelope::subscribed("smarthome/+/light").to_text().unwrap();
//! assert_eq!(reply, r#"{"type":"subscribed","topic":"smarthome/+/light"}"#);
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod testing;
pub mod transport;

pub use bridge::{ClientRegistry, MessageRouter, Session};
pub use config::*;
pub use error::{BridgeError, BridgeResult};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
pub use transport::{Broker, BrokerMessage};
