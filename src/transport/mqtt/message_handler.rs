//! Pure message routing decisions for upstream MQTT events
//!
//! This module turns raw rumqttc events into routing decisions and forwards
//! broker messages to the bridge's fan-out stage.

use crate::transport::BrokerMessage;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: suback
                        .return_codes
                        .iter()
                        .map(|code| Self::reason_code_value(*code))
                        .collect(),
                    reason: suback
                        .properties
                        .as_ref()
                        .and_then(|properties| properties.reason_string.clone()),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(packet_id)) => EventRoute::SubscribeSent {
                packet_id: *packet_id,
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Wire value of a SubAck reason code
    pub fn reason_code_value(code: SubscribeReasonCode) -> u8 {
        match code {
            SubscribeReasonCode::Success(qos) => qos as u8,
            SubscribeReasonCode::Failure | SubscribeReasonCode::Unspecified => 0x80,
            SubscribeReasonCode::ImplementationSpecific => 0x83,
            SubscribeReasonCode::NotAuthorized => 0x87,
            SubscribeReasonCode::TopicFilterInvalid => 0x8F,
            SubscribeReasonCode::PkidInUse => 0x91,
            SubscribeReasonCode::QuotaExceeded => 0x97,
            SubscribeReasonCode::SharedSubscriptionsNotSupported => 0x9E,
            SubscribeReasonCode::SubscriptionIdNotSupported => 0xA1,
            SubscribeReasonCode::WildcardSubscriptionsNotSupported => 0xA2,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    ///
    /// Any code of 0x80 or above is a rejection. The broker's reason string,
    /// when it sent one, is appended to the error text.
    pub fn validate_subscription_success(
        return_codes: &[u8],
        reason: Option<&str>,
    ) -> Result<(), String> {
        if return_codes.iter().any(|&code| code >= 0x80) {
            let codes: Vec<String> = return_codes.iter().map(|code| format!("0x{code:02X}")).collect();
            let mut message = format!("Subscription rejected with reason codes [{}]", codes.join(", "));
            if let Some(reason) = reason {
                message.push_str(": ");
                message.push_str(reason);
            }
            Err(message)
        } else {
            Ok(())
        }
    }

    /// Build the hand-off record for a received publish (pure function)
    pub fn build_broker_message(topic: String, payload: Vec<u8>, received_at: i64) -> BrokerMessage {
        BrokerMessage {
            topic,
            payload,
            received_at,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// MQTT broker disconnected us
    Disconnected,
    /// Subscription confirmed with reason codes
    SubscriptionConfirmed {
        packet_id: u16,
        return_codes: Vec<u8>,
        reason: Option<String>,
    },
    /// SUBSCRIBE packet written to the network
    SubscribeSent { packet_id: u16 },
    /// Infrastructure event (PingResp, UnsubAck, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Forwards broker messages to the router task (impure I/O)
#[derive(Debug, Default)]
pub struct MessageForwarder {
    sender: Option<mpsc::Sender<BrokerMessage>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self { sender: None }
    }

    pub fn set_sender(&mut self, sender: mpsc::Sender<BrokerMessage>) {
        self.sender = Some(sender);
    }

    pub fn has_sender(&self) -> bool {
        self.sender.is_some()
    }

    /// Hand a broker message to the router
    pub async fn forward(&self, message: BrokerMessage) -> Result<(), String> {
        match &self.sender {
            Some(sender) => {
                debug!(topic = %message.topic, "Forwarding broker message to router");
                sender
                    .send(message)
                    .await
                    .map_err(|e| format!("Failed to forward message to router: {e}"))
            }
            None => {
                warn!("Received MQTT message but no router is attached - message dropped");
                Err("No router attached".to_string())
            }
        }
    }
}

/// Receives the broker's verdict on one subscribe request
pub type SubAckResponder = oneshot::Sender<Result<(), String>>;

#[derive(Debug)]
struct PendingSubscription {
    topic: String,
    responder: Option<SubAckResponder>,
}

/// Pairs SubAcks with the subscribe requests that caused them
///
/// Requests leave the client's request channel in the order they were
/// queued, so each outgoing SUBSCRIBE claims the oldest unsent entry and is
/// then tracked by packet id until its SubAck arrives. Requests still in the
/// channel survive a reconnect; packets already written to a lost connection
/// are failed.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    unsent: VecDeque<PendingSubscription>,
    inflight: HashMap<u16, PendingSubscription>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscribe request right after it was queued
    pub fn queued(&mut self, topic: impl Into<String>, responder: Option<SubAckResponder>) {
        self.unsent.push_back(PendingSubscription {
            topic: topic.into(),
            responder,
        });
    }

    /// The oldest queued request went out with `packet_id`
    pub fn sent(&mut self, packet_id: u16) {
        match self.unsent.pop_front() {
            Some(pending) => {
                self.inflight.insert(packet_id, pending);
            }
            None => debug!(packet_id, "SUBSCRIBE sent without a tracked request"),
        }
    }

    /// Resolve the request acknowledged by `packet_id`, returning its topic
    pub fn acknowledged(&mut self, packet_id: u16, outcome: Result<(), String>) -> Option<String> {
        let pending = self.inflight.remove(&packet_id)?;
        if let Some(responder) = pending.responder {
            // The requester may have timed out already
            let _ = responder.send(outcome);
        }
        Some(pending.topic)
    }

    /// Fail every request written to a connection that is now gone
    pub fn connection_lost(&mut self, reason: &str) -> Vec<String> {
        let mut topics = Vec::with_capacity(self.inflight.len());
        for (_, pending) in self.inflight.drain() {
            if let Some(responder) = pending.responder {
                let _ = responder.send(Err(reason.to_string()));
            }
            topics.push(pending.topic);
        }
        topics.sort();
        topics
    }

    /// Fail every tracked request, sent or not
    pub fn close(&mut self, reason: &str) {
        let unsent = self.unsent.drain(..);
        let inflight = self.inflight.drain().map(|(_, pending)| pending);
        for pending in unsent.chain(inflight) {
            if let Some(responder) = pending.responder {
                let _ = responder.send(Err(reason.to_string()));
            }
        }
    }

    /// Requests still waiting for a SubAck
    pub fn pending(&self) -> usize {
        self.unsent.len() + self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, Publish, SubAck, SubAckProperties,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: rumqttc::v5::mqttbytes::v5::DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Bytes::from("smarthome/room_1_left/light"),
            pkid: 0,
            payload: Bytes::from(r#"{"roomId":"room_1_left","isOn":true,"timestamp":1}"#),
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&publish) {
            EventRoute::MessageReceived { topic, payload } => {
                assert_eq!(topic, "smarthome/room_1_left/light");
                assert!(payload.starts_with(b"{\"roomId\""));
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forwarder_without_sender_drops() {
        let forwarder = MessageForwarder::new();
        assert!(!forwarder.has_sender());
        let message = MessageHandler::build_broker_message("a".into(), b"x".to_vec(), 1);
        assert!(forwarder.forward(message).await.is_err());
    }

    #[tokio::test]
    async fn test_forwarder_delivers_to_router() {
        let mut forwarder = MessageForwarder::new();
        let (tx, mut rx) = mpsc::channel(4);
        forwarder.set_sender(tx);

        let message = MessageHandler::build_broker_message("a/b".into(), b"on".to_vec(), 42);
        forwarder.forward(message.clone()).await.unwrap();

        let received = rx.recv().await.expect("message should arrive");
        assert_eq!(received, message);
    }

    #[test]
    fn test_route_suback_keeps_reason_codes() {
        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![SubscribeReasonCode::NotAuthorized],
            properties: Some(SubAckProperties {
                reason_string: Some("not allowed".to_string()),
                user_properties: Vec::new(),
            }),
        }));

        match MessageHandler::route_mqtt_event(&suback) {
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
                reason,
            } => {
                assert_eq!(packet_id, 7);
                assert_eq!(return_codes, vec![0x87]);
                assert_eq!(reason.as_deref(), Some("not allowed"));
            }
            other => panic!("Expected SubscriptionConfirmed route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_outgoing_subscribe() {
        let sent = Event::Outgoing(Outgoing::Subscribe(3));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&sent),
            EventRoute::SubscribeSent { packet_id: 3 }
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        ));
    }

    #[test]
    fn test_reason_code_values() {
        assert_eq!(
            MessageHandler::reason_code_value(SubscribeReasonCode::Success(QoS::AtMostOnce)),
            0x00
        );
        assert_eq!(
            MessageHandler::reason_code_value(SubscribeReasonCode::Success(QoS::AtLeastOnce)),
            0x01
        );
        assert_eq!(
            MessageHandler::reason_code_value(SubscribeReasonCode::TopicFilterInvalid),
            0x8F
        );
    }

    #[test]
    fn test_validate_subscription_success() {
        assert!(MessageHandler::validate_subscription_success(&[0x00], None).is_ok());
        assert!(MessageHandler::validate_subscription_success(&[0x00, 0x01], None).is_ok());

        let err = MessageHandler::validate_subscription_success(&[0x87], None).unwrap_err();
        assert_eq!(err, "Subscription rejected with reason codes [0x87]");

        let err =
            MessageHandler::validate_subscription_success(&[0x00, 0x80], Some("quota")).unwrap_err();
        assert_eq!(err, "Subscription rejected with reason codes [0x00, 0x80]: quota");
    }

    #[tokio::test]
    async fn test_tracker_pairs_acks_in_send_order() {
        let mut tracker = SubscriptionTracker::new();
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        tracker.queued("a/b", Some(first_tx));
        tracker.queued("c/+", Some(second_tx));

        tracker.sent(10);
        tracker.sent(11);
        assert_eq!(tracker.pending(), 2);

        assert_eq!(
            tracker.acknowledged(11, Err("rejected".to_string())),
            Some("c/+".to_string())
        );
        assert_eq!(tracker.acknowledged(10, Ok(())), Some("a/b".to_string()));
        assert_eq!(tracker.pending(), 0);

        assert_eq!(first_rx.await.unwrap(), Ok(()));
        assert_eq!(second_rx.await.unwrap(), Err("rejected".to_string()));
    }

    #[tokio::test]
    async fn test_tracker_fails_inflight_on_connection_loss() {
        let mut tracker = SubscriptionTracker::new();
        let (sent_tx, sent_rx) = oneshot::channel();
        let (queued_tx, _queued_rx) = oneshot::channel();
        tracker.queued("a/b", Some(sent_tx));
        tracker.queued("c/d", Some(queued_tx));
        tracker.sent(1);

        assert_eq!(tracker.connection_lost("connection lost"), vec!["a/b"]);
        assert!(sent_rx.await.unwrap().is_err());

        // The unsent request goes out on the next connection
        assert_eq!(tracker.pending(), 1);
        tracker.sent(1);
        assert_eq!(tracker.acknowledged(1, Ok(())), Some("c/d".to_string()));
    }

    #[test]
    fn test_tracker_ignores_unknown_packets() {
        let mut tracker = SubscriptionTracker::new();
        tracker.sent(5);
        assert_eq!(tracker.acknowledged(5, Ok(())), None);
        tracker.queued("resubscribed/topic", None);
        tracker.sent(6);
        assert_eq!(
            tracker.acknowledged(6, Ok(())),
            Some("resubscribed/topic".to_string())
        );
    }

    #[tokio::test]
    async fn test_tracker_close_fails_everything() {
        let mut tracker = SubscriptionTracker::new();
        let (sent_tx, sent_rx) = oneshot::channel();
        let (queued_tx, queued_rx) = oneshot::channel();
        tracker.queued("a/b", Some(sent_tx));
        tracker.queued("c/d", Some(queued_tx));
        tracker.sent(1);

        tracker.close("client closed");

        assert_eq!(tracker.pending(), 0);
        assert_eq!(sent_rx.await.unwrap(), Err("client closed".to_string()));
        assert_eq!(queued_rx.await.unwrap(), Err("client closed".to_string()));
    }
}
