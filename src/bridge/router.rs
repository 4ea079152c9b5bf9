//! Fan-out of broker messages to interested clients

use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::registry::ClientRegistry;
use crate::observability::metrics::metrics;
use crate::protocol::messages::OutboundEnvelope;
use crate::transport::BrokerMessage;

/// Delivers each broker message at most once to every matching client
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: ClientRegistry,
}

impl MessageRouter {
    pub fn new(registry: ClientRegistry) -> Self {
        Self { registry }
    }

    /// Route one message; returns the number of clients it was queued for
    pub async fn route(&self, message: &BrokerMessage) -> usize {
        let started = Instant::now();
        let envelope = OutboundEnvelope::message(
            message.topic.clone(),
            message.payload_text(),
            message.received_at,
        );
        let frame = match envelope.to_text() {
            Ok(frame) => frame,
            Err(e) => {
                error!(topic = %message.topic, "Failed to serialize message envelope: {}", e);
                return 0;
            }
        };

        let mut delivered = 0usize;
        let mut dropped = 0usize;
        self.registry
            .for_each_client(|client_id, handle| {
                if !handle.is_open() || !handle.interested_in(&message.topic) {
                    return;
                }
                if handle.send(frame.clone()) {
                    delivered += 1;
                } else {
                    debug!(client_id = %client_id, "Client closed during fan-out");
                    dropped += 1;
                }
            })
            .await;

        metrics().message_routed(delivered, dropped, started.elapsed());
        debug!(topic = %message.topic, delivered, "Broker message routed");
        delivered
    }

    /// Consume broker messages until the upstream side drops its sender
    pub async fn run(self, mut receiver: mpsc::Receiver<BrokerMessage>) {
        info!("Message router started");
        while let Some(message) = receiver.recv().await {
            self.route(&message).await;
        }
        info!("Message router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::registry::ClientId;
    use serde_json::Value;

    fn light_message(topic: &str) -> BrokerMessage {
        BrokerMessage {
            topic: topic.to_string(),
            payload: br#"{"roomId":"room_1_left","isOn":true,"timestamp":1}"#.to_vec(),
            received_at: 1_700_000_000_000,
        }
    }

    async fn client(
        registry: &ClientRegistry,
        topics: &[&str],
    ) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.add_client(id, tx).await;
        for topic in topics {
            registry.add_subscription(&id, topic).await;
        }
        (id, rx)
    }

    #[tokio::test]
    async fn test_literal_and_wildcard_subscribers_each_receive_once() {
        let registry = ClientRegistry::new();
        let (_a, mut rx_a) = client(&registry, &["smarthome/room_1_left/light"]).await;
        let (_b, mut rx_b) = client(&registry, &["smarthome/+/light"]).await;
        let router = MessageRouter::new(registry);

        let delivered = router.route(&light_message("smarthome/room_1_left/light")).await;

        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overlapping_patterns_deliver_once() {
        let registry = ClientRegistry::new();
        let (_id, mut rx) = client(
            &registry,
            &["smarthome/room_1_left/light", "smarthome/+/light", "smarthome/#"],
        )
        .await;
        let router = MessageRouter::new(registry);

        assert_eq!(router.route(&light_message("smarthome/room_1_left/light")).await, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_message_frame_shape() {
        let registry = ClientRegistry::new();
        let (_id, mut rx) = client(&registry, &["smarthome/+/light"]).await;
        let router = MessageRouter::new(registry);

        router.route(&light_message("smarthome/kitchen/light")).await;

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["topic"], "smarthome/kitchen/light");
        assert_eq!(
            frame["payload"],
            r#"{"roomId":"room_1_left","isOn":true,"timestamp":1}"#
        );
        assert_eq!(frame["timestamp"], 1_700_000_000_000i64);
    }

    #[tokio::test]
    async fn test_non_matching_and_closed_clients_are_skipped() {
        let registry = ClientRegistry::new();
        let (_a, mut rx_other) = client(&registry, &["smarthome/+/heat"]).await;
        let (_b, rx_closed) = client(&registry, &["smarthome/#"]).await;
        drop(rx_closed);
        let router = MessageRouter::new(registry);

        assert_eq!(router.route(&light_message("smarthome/x/light")).await, 0);
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let registry = ClientRegistry::new();
        let (_id, mut rx) = client(&registry, &["a/b"]).await;
        let router = MessageRouter::new(registry);
        let (tx, broker_rx) = mpsc::channel(8);

        let task = tokio::spawn(router.run(broker_rx));
        tx.send(light_message("a/b")).await.unwrap();
        tx.send(light_message("a/c")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
