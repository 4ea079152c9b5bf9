//! JSON envelopes exchanged with browser clients over the WebSocket
//!
//! Every frame is a JSON object tagged by a `type` field. Inbound frames are
//! requests from the browser, outbound frames are acknowledgements, errors and
//! broker messages routed back to the browser.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text sent to every client right after the upgrade completes
pub const CONNECTED_MESSAGE: &str = "MQTT WebSocket Proxy connected";
/// Error text for requests that need the upstream broker while it is down
pub const BROKER_NOT_READY_MESSAGE: &str = "MQTT broker not ready";
/// Error text for frames that are not valid request JSON
pub const INVALID_JSON_MESSAGE: &str = "Invalid JSON message";
/// Error text for frames carrying a `type` this bridge does not handle
pub const UNKNOWN_TYPE_MESSAGE: &str = "Unknown message type";

/// Every `type` value the bridge may send to a client
pub const OUTBOUND_TYPES: [&str; 6] = [
    "connected",
    "subscribed",
    "unsubscribed",
    "published",
    "message",
    "error",
];

/// Request sent by a browser client
///
/// # Examples
/// ```
/// use mqtt_ws_bridge::protocol::InboundEnvelope;
///
/// let request: InboundEnvelope =
///     serde_json::from_str(r#"{"type":"subscribe","topic":"smarthome/+/light"}"#).unwrap();
/// assert_eq!(
///     request,
///     InboundEnvelope::Subscribe { topic: "smarthome/+/light".to_string() }
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEnvelope {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: String },
}

impl InboundEnvelope {
    pub fn topic(&self) -> &str {
        match self {
            InboundEnvelope::Subscribe { topic }
            | InboundEnvelope::Unsubscribe { topic }
            | InboundEnvelope::Publish { topic, .. } => topic,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            InboundEnvelope::Subscribe { .. } => "subscribe",
            InboundEnvelope::Unsubscribe { .. } => "unsubscribe",
            InboundEnvelope::Publish { .. } => "publish",
        }
    }
}

/// Outcome of decoding one inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A well-formed request
    Request(InboundEnvelope),
    /// Valid JSON whose `type` is missing or not handled; carries the raw `type`
    UnknownType(Option<Value>),
    /// Not JSON, `null`, or a known `type` with missing or mistyped fields
    Invalid(String),
}

impl InboundFrame {
    /// Decode a text frame (pure function)
    pub fn parse(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => return InboundFrame::Invalid(e.to_string()),
        };
        // `null` has no fields to read a type from
        if value.is_null() {
            return InboundFrame::Invalid("expected a JSON value with a type, found null".to_string());
        }

        let received_type = value.get("type").cloned();
        match received_type.as_ref().and_then(Value::as_str) {
            Some("subscribe") | Some("unsubscribe") | Some("publish") => {
                match serde_json::from_value::<InboundEnvelope>(value) {
                    Ok(envelope) => InboundFrame::Request(envelope),
                    Err(e) => InboundFrame::Invalid(e.to_string()),
                }
            }
            _ => InboundFrame::UnknownType(received_type),
        }
    }
}

/// Frame sent to a browser client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEnvelope {
    Connected {
        message: String,
    },
    Subscribed {
        topic: String,
    },
    Unsubscribed {
        topic: String,
    },
    Published {
        topic: String,
    },
    Message {
        topic: String,
        payload: String,
        /// Receive time in epoch milliseconds
        timestamp: i64,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(
            default,
            rename = "receivedType",
            skip_serializing_if = "Option::is_none"
        )]
        received_type: Option<Value>,
    },
}

impl OutboundEnvelope {
    pub fn connected() -> Self {
        Self::Connected {
            message: CONNECTED_MESSAGE.to_string(),
        }
    }

    pub fn subscribed(topic: impl Into<String>) -> Self {
        Self::Subscribed {
            topic: topic.into(),
        }
    }

    pub fn unsubscribed(topic: impl Into<String>) -> Self {
        Self::Unsubscribed {
            topic: topic.into(),
        }
    }

    pub fn published(topic: impl Into<String>) -> Self {
        Self::Published {
            topic: topic.into(),
        }
    }

    pub fn message(topic: impl Into<String>, payload: impl Into<String>, timestamp: i64) -> Self {
        Self::Message {
            topic: topic.into(),
            payload: payload.into(),
            timestamp,
        }
    }

    pub fn broker_not_ready() -> Self {
        Self::Error {
            message: BROKER_NOT_READY_MESSAGE.to_string(),
            error: None,
            received_type: None,
        }
    }

    pub fn subscribe_failed(topic: &str, error: impl Into<String>) -> Self {
        Self::Error {
            message: format!("Failed to subscribe to {topic}"),
            error: Some(error.into()),
            received_type: None,
        }
    }

    pub fn publish_failed(topic: &str, error: impl Into<String>) -> Self {
        Self::Error {
            message: format!("Failed to publish to {topic}"),
            error: Some(error.into()),
            received_type: None,
        }
    }

    pub fn invalid_json(error: impl Into<String>) -> Self {
        Self::Error {
            message: INVALID_JSON_MESSAGE.to_string(),
            error: Some(error.into()),
            received_type: None,
        }
    }

    pub fn unknown_type(received_type: Option<Value>) -> Self {
        Self::Error {
            message: UNKNOWN_TYPE_MESSAGE.to_string(),
            error: None,
            received_type,
        }
    }

    /// Value of the `type` tag this envelope serializes with
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::Published { .. } => "published",
            Self::Message { .. } => "message",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize into a WebSocket text frame
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
