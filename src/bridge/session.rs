//! Per-connection request handling
//!
//! A [`Session`] turns the inbound frames of one browser connection into
//! registry updates and broker operations, replying on the client's own
//! outbound channel. Requests are handled to completion in arrival order.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::registry::{ClientId, ClientRegistry};
use crate::error::sanitize_error_detail;
use crate::observability::metrics::metrics;
use crate::protocol::messages::{InboundEnvelope, InboundFrame, OutboundEnvelope};
use crate::transport::Broker;

/// Lifecycle of a session; `Closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

pub struct Session<B: Broker> {
    id: ClientId,
    registry: ClientRegistry,
    broker: Arc<B>,
    state: SessionState,
}

impl<B: Broker> Session<B> {
    /// Register the client and greet it with `connected`
    pub async fn open(
        registry: ClientRegistry,
        broker: Arc<B>,
        sender: mpsc::UnboundedSender<String>,
    ) -> Self {
        let id = ClientId::new();
        registry.add_client(id, sender).await;
        metrics().client_connected();

        let session = Self {
            id,
            registry,
            broker,
            state: SessionState::Open,
        };
        session.reply(OutboundEnvelope::connected()).await;
        session
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one inbound text frame
    pub async fn handle_text(&mut self, text: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        metrics().frame_received();

        match InboundFrame::parse(text) {
            InboundFrame::Request(request) => self.handle_request(request).await,
            InboundFrame::UnknownType(received_type) => {
                metrics().unknown_frame();
                debug!(client_id = %self.id, ?received_type, "Unknown message type");
                self.reply(OutboundEnvelope::unknown_type(received_type))
                    .await;
            }
            InboundFrame::Invalid(error) => {
                metrics().invalid_frame();
                debug!(client_id = %self.id, "Invalid frame: {}", error);
                self.reply(OutboundEnvelope::invalid_json(error)).await;
            }
        }
    }

    pub async fn handle_request(&mut self, request: InboundEnvelope) {
        match request {
            InboundEnvelope::Subscribe { topic } => self.subscribe(topic).await,
            InboundEnvelope::Unsubscribe { topic } => self.unsubscribe(topic).await,
            InboundEnvelope::Publish { topic, payload } => self.publish(topic, payload).await,
        }
    }

    async fn subscribe(&self, topic: String) {
        metrics().subscribe_requested();
        let _guard = self.registry.lock_topic(&topic).await;
        // The local entry stays even when the broker is down
        self.registry.add_subscription(&self.id, &topic).await;

        if !self.broker.is_ready() {
            metrics().broker_not_ready();
            self.reply(OutboundEnvelope::broker_not_ready()).await;
            return;
        }

        match self.broker.subscribe(&topic).await {
            Ok(()) => {
                info!(client_id = %self.id, topic = %topic, "Client subscribed");
                self.reply(OutboundEnvelope::subscribed(topic)).await;
            }
            Err(e) => {
                metrics().subscribe_failed();
                warn!(client_id = %self.id, topic = %topic, "Subscribe failed: {}", e);
                let detail = sanitize_error_detail(&e.to_string());
                self.reply(OutboundEnvelope::subscribe_failed(&topic, detail))
                    .await;
            }
        }
    }

    async fn unsubscribe(&self, topic: String) {
        {
            let _guard = self.registry.lock_topic(&topic).await;
            if self.registry.release_topic(&self.id, &topic).await {
                self.broker.unsubscribe(&topic).await;
            }
        }
        info!(client_id = %self.id, topic = %topic, "Client unsubscribed");
        self.reply(OutboundEnvelope::unsubscribed(topic)).await;
    }

    async fn publish(&self, topic: String, payload: String) {
        metrics().publish_requested();
        if !self.broker.is_ready() {
            metrics().broker_not_ready();
            self.reply(OutboundEnvelope::broker_not_ready()).await;
            return;
        }

        match self.broker.publish(&topic, payload.into_bytes()).await {
            Ok(()) => {
                debug!(client_id = %self.id, topic = %topic, "Client published");
                self.reply(OutboundEnvelope::published(topic)).await;
            }
            Err(e) => {
                warn!(client_id = %self.id, topic = %topic, "Publish failed: {}", e);
                let detail = sanitize_error_detail(&e.to_string());
                self.reply(OutboundEnvelope::publish_failed(&topic, detail))
                    .await;
            }
        }
    }

    /// Queue a reply; dropped silently once the client is gone
    async fn reply(&self, envelope: OutboundEnvelope) {
        match envelope.to_text() {
            Ok(frame) => {
                if !self.registry.send_to(&self.id, frame).await {
                    debug!(client_id = %self.id, "Reply dropped, client gone");
                }
            }
            Err(e) => warn!(client_id = %self.id, "Failed to serialize reply: {}", e),
        }
    }

    /// Remove the client and release upstream topics nobody else holds
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        let held = self
            .registry
            .subscriptions_of(&self.id)
            .await
            .unwrap_or_default();
        let _guards = self.registry.lock_topics(&held).await;
        let orphaned = self.registry.release_client(&self.id).await;
        for topic in &orphaned {
            self.broker.unsubscribe(topic).await;
        }
        metrics().client_disconnected();
        info!(
            client_id = %self.id,
            released = orphaned.len(),
            "Client session closed"
        );
    }
}
