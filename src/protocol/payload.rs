//! Application payload carried inside `publish` and `message` envelopes
//!
//! The bridge forwards payloads as opaque text. This type documents the
//! convention the smart-home UI uses and backs the `publish-light` tool.

use serde::{Deserialize, Serialize};

/// Light state of a single room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LightState {
    pub room_id: String,
    pub is_on: bool,
    /// Epoch milliseconds at which the state was produced
    pub timestamp: i64,
    /// Originating client, used by browsers to spot their own echoes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl LightState {
    pub fn new(room_id: impl Into<String>, is_on: bool) -> Self {
        Self {
            room_id: room_id.into(),
            is_on,
            timestamp: chrono::Utc::now().timestamp_millis(),
            client_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}
