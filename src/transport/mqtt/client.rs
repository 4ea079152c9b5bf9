//! Impure I/O operations for the upstream MQTT client
//!
//! This module owns the single rumqttc connection shared by every browser
//! client, drives its event loop from a supervisor task, and publishes the
//! readiness of the link through a watch channel.

use super::connection::{
    configure_mqtt_options, generate_client_id, ConnectionState, MqttError, ReconnectConfig,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler, SubscriptionTracker};
use crate::config::MqttSection;
use crate::observability::metrics::metrics;
use crate::transport::{Broker, BrokerMessage};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::collections::HashSet;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the request channel between [`AsyncClient`] and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long a subscribe waits for the broker's SubAck
const SUBACK_TIMEOUT: Duration = Duration::from_secs(10);

type SharedTracker = Arc<std::sync::Mutex<SubscriptionTracker>>;

fn lock_tracker(tracker: &std::sync::Mutex<SubscriptionTracker>) -> MutexGuard<'_, SubscriptionTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The one upstream MQTT connection of the bridge
pub struct MqttClient {
    client_id: String,
    client: AsyncClient,
    event_loop: std::sync::Mutex<Option<EventLoop>>, // taken by start()
    reconnect_config: ReconnectConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    upstream_topics: Arc<Mutex<HashSet<String>>>, // re-subscribed after every ConnAck
    subscriptions: SharedTracker,
    message_forwarder: Arc<Mutex<MessageForwarder>>,
    event_loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Everything the supervisor task needs, cloned out of the client
#[derive(Clone)]
struct SupervisorContext {
    client_id: String,
    client: AsyncClient,
    reconnect_config: ReconnectConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    upstream_topics: Arc<Mutex<HashSet<String>>>,
    subscriptions: SharedTracker,
    message_forwarder: Arc<Mutex<MessageForwarder>>,
}

impl MqttClient {
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        let client_id = generate_client_id(&config.client_id_prefix);
        let reconnect_config = ReconnectConfig::from_section(&config);
        HealthMonitor::validate_connection_config(&reconnect_config)
            .map_err(MqttError::ConnectionFailed)?;
        let mqtt_options = configure_mqtt_options(&client_id, &config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (state_tx, state_rx) =
            watch::channel(ConnectionState::Disconnected("Not started".to_string()));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(MqttClient {
            client_id,
            client,
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            reconnect_config,
            state_tx: Arc::new(state_tx),
            state_rx,
            shutdown_tx,
            upstream_topics: Arc::new(Mutex::new(HashSet::new())),
            subscriptions: Arc::new(std::sync::Mutex::new(SubscriptionTracker::new())),
            message_forwarder: Arc::new(Mutex::new(MessageForwarder::new())),
            event_loop_handle: std::sync::Mutex::new(None),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Attach the router channel that receives every broker message
    pub async fn set_message_sender(&self, sender: mpsc::Sender<BrokerMessage>) {
        let mut forwarder = self.message_forwarder.lock().await;
        forwarder.set_sender(sender);
    }

    /// Subscribe to connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Start the connection supervisor
    ///
    /// Returns immediately; readiness flips to true once the broker sends
    /// ConnAck. The supervisor keeps retrying at a fixed interval until
    /// [`MqttClient::disconnect`] is called.
    pub fn start(&self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or_else(|| MqttError::ConnectionFailed("Event loop already started".to_string()))?;

        let _ = self.state_tx.send_replace(ConnectionState::Connecting);
        metrics().mqtt_connection_attempt();

        let context = self.supervisor_context();
        let shutdown_rx = self.shutdown_tx.subscribe();

        let span = crate::mqtt_span!(client_id = %self.client_id);
        let handle =
            tokio::spawn(Self::run_supervisor(event_loop, context, shutdown_rx).instrument(span));
        if let Ok(mut guard) = self.event_loop_handle.lock() {
            *guard = Some(handle);
        }

        Ok(())
    }

    fn supervisor_context(&self) -> SupervisorContext {
        SupervisorContext {
            client_id: self.client_id.clone(),
            client: self.client.clone(),
            reconnect_config: self.reconnect_config.clone(),
            state_tx: self.state_tx.clone(),
            upstream_topics: self.upstream_topics.clone(),
            subscriptions: self.subscriptions.clone(),
            message_forwarder: self.message_forwarder.clone(),
        }
    }

    async fn run_supervisor(
        mut event_loop: EventLoop,
        context: SupervisorContext,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(
            client_id = %context.client_id,
            "Starting MQTT connection supervisor"
        );
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping connection supervisor");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            Self::process_event_route(route, &context, &mut reconnect_attempts).await;
                        }
                        Err(e) => {
                            if !Self::handle_event_loop_error(
                                e,
                                &context,
                                &mut reconnect_attempts,
                                shutdown_rx.clone(),
                            )
                            .await
                            {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!(client_id = %context.client_id, "MQTT connection supervisor stopped");
    }

    /// Apply a connection event to the shared state
    fn transition(state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(event);
        let previous = state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
        }
    }

    /// Process routed MQTT event - extracted for testability
    async fn process_event_route(
        route: EventRoute,
        context: &SupervisorContext,
        reconnect_attempts: &mut u32,
    ) {
        match route {
            EventRoute::ConnectionAcknowledged => {
                Self::transition(&context.state_tx, ConnectionEvent::ConnAckReceived);
                *reconnect_attempts = 0;
                metrics().mqtt_connection_established();
                Self::resubscribe_to_topics(
                    &context.client,
                    &context.upstream_topics,
                    &context.subscriptions,
                )
                .await;
            }
            EventRoute::MessageReceived { topic, payload } => {
                metrics().mqtt_message_received();
                let received_at = chrono::Utc::now().timestamp_millis();
                let message = MessageHandler::build_broker_message(topic, payload, received_at);
                let forwarder = context.message_forwarder.lock().await;
                if let Err(e) = forwarder.forward(message).await {
                    error!("Failed to hand broker message to router: {}", e);
                }
            }
            EventRoute::Disconnected => {
                Self::transition(&context.state_tx, ConnectionEvent::DisconnectedByBroker);
                metrics().mqtt_connection_lost();
                Self::fail_inflight_subscriptions(&context.subscriptions, "Disconnected by broker");
            }
            EventRoute::SubscribeSent { packet_id } => {
                lock_tracker(&context.subscriptions).sent(packet_id);
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
                reason,
            } => {
                let outcome =
                    MessageHandler::validate_subscription_success(&return_codes, reason.as_deref());
                let failure = outcome.as_ref().err().cloned();
                let topic = lock_tracker(&context.subscriptions).acknowledged(packet_id, outcome);
                match (topic, failure) {
                    (Some(topic), None) => {
                        debug!(target: "mqtt_transport", packet_id, topic = %topic, "Subscription acknowledged");
                    }
                    (Some(topic), Some(failure)) => {
                        warn!(packet_id, topic = %topic, "Broker rejected subscription: {}", failure);
                    }
                    (None, _) => {
                        debug!(target: "mqtt_transport", packet_id, "SubAck for an untracked request");
                    }
                }
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
            }
            EventRoute::OutgoingEvent => {}
        }
    }

    /// Handle event loop error - extracted for testability
    /// Returns true to keep polling (the next poll reconnects), false to stop
    async fn handle_event_loop_error(
        error: rumqttc::v5::ConnectionError,
        context: &SupervisorContext,
        reconnect_attempts: &mut u32,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        let was_ready = context.state_tx.borrow().is_ready();
        let reason = error.to_string();
        Self::fail_inflight_subscriptions(&context.subscriptions, &reason);
        Self::transition(&context.state_tx, ConnectionEvent::NetworkError(reason));
        if was_ready {
            metrics().mqtt_connection_lost();
        } else {
            metrics().mqtt_connection_failed();
        }

        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            &context.reconnect_config,
            *shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                Self::transition(
                    &context.state_tx,
                    ConnectionEvent::ReconnectionStarted(attempt),
                );
                metrics().mqtt_reconnect_attempt();
                info!("Retrying broker connection in {}ms (attempt {})", delay_ms, attempt);
                Self::interruptible_sleep(shutdown_rx, delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown requested, not reconnecting");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    context.reconnect_config.max_attempts.unwrap_or_default()
                );
                Self::transition(&context.state_tx, ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Helper to resubscribe to topics after (re)connection
    async fn resubscribe_to_topics(
        client: &AsyncClient,
        topics: &Mutex<HashSet<String>>,
        subscriptions: &std::sync::Mutex<SubscriptionTracker>,
    ) {
        let topics = topics.lock().await;
        let mut tracker = lock_tracker(subscriptions);
        for topic in topics.iter() {
            if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                error!("Failed to re-subscribe to {}: {}", topic, e);
            } else {
                tracker.queued(topic.clone(), None);
                debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic);
            }
        }
    }

    /// Fail subscribe requests whose packets went out on a dead connection
    fn fail_inflight_subscriptions(subscriptions: &std::sync::Mutex<SubscriptionTracker>, reason: &str) {
        let failed = lock_tracker(subscriptions).connection_lost(reason);
        if !failed.is_empty() {
            warn!(topics = ?failed, "Connection lost before SubAck");
        }
    }

    /// Get current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        HealthMonitor::can_publish(&self.state_rx.borrow())
    }

    /// Wait until the link is ready or the timeout elapses
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut state_rx = self.state_rx.clone();
        let wait = async {
            loop {
                if state_rx.borrow_and_update().is_ready() {
                    return true;
                }
                if state_rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    /// Topics currently subscribed on the upstream connection
    pub async fn upstream_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.upstream_topics.lock().await.iter().cloned().collect();
        topics.sort();
        topics
    }

    /// Subscribe upstream and wait for the broker's SubAck
    pub async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        if !HealthMonitor::can_subscribe(&self.state_rx.borrow()) {
            return Err(MqttError::NotReady);
        }

        let failed = |reason: String| MqttError::SubscriptionFailed {
            topic: topic.to_string(),
            reason,
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        {
            // Tracker order must match request channel order
            let mut tracker = lock_tracker(&self.subscriptions);
            self.client
                .try_subscribe(topic.to_string(), QoS::AtMostOnce)
                .map_err(|e| failed(e.to_string()))?;
            tracker.queued(topic, Some(ack_tx));
        }

        match tokio::time::timeout(SUBACK_TIMEOUT, ack_rx).await {
            Ok(Ok(Ok(()))) => {
                self.upstream_topics.lock().await.insert(topic.to_string());
                info!(topic = %topic, "Subscribed upstream");
                Ok(())
            }
            Ok(Ok(Err(reason))) => Err(failed(reason)),
            Ok(Err(_)) => Err(failed("Connection supervisor stopped".to_string())),
            Err(_) => Err(failed(format!(
                "No SubAck within {}s",
                SUBACK_TIMEOUT.as_secs()
            ))),
        }
    }

    /// Best-effort unsubscribe; never fails and is not gated on readiness
    pub async fn unsubscribe(&self, topic: &str) {
        self.upstream_topics.lock().await.remove(topic);

        match self.client.try_unsubscribe(topic.to_string()) {
            Ok(()) => info!(topic = %topic, "Unsubscribed upstream"),
            Err(e) => warn!(topic = %topic, "Upstream unsubscribe not sent: {}", e),
        }
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        if !HealthMonitor::can_publish(&self.state_rx.borrow()) {
            return Err(MqttError::NotReady);
        }

        match self
            .client
            .try_publish(topic.to_string(), QoS::AtMostOnce, false, payload)
        {
            Ok(()) => {
                metrics().mqtt_message_published();
                debug!(topic = %topic, "Published upstream");
                Ok(())
            }
            Err(e) => {
                metrics().mqtt_publish_failed();
                Err(MqttError::PublishFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Disconnect from the broker and stop the supervisor
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        let was_running = self
            .event_loop
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(false);

        if was_running {
            let request = tokio::time::timeout(Duration::from_millis(500), self.client.disconnect());
            match request.await {
                Ok(Ok(())) => debug!("Disconnect request queued"),
                Ok(Err(e)) => debug!("Disconnect request not queued: {}", e),
                Err(_) => debug!("Disconnect request timed out"),
            }
        }

        let _ = self.shutdown_tx.send(true);

        let handle = self
            .event_loop_handle
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());

        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("Connection supervisor shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Connection supervisor ended with error: {}", e)
                }
                Err(_) => warn!("Connection supervisor didn't shut down gracefully"),
                _ => {}
            }
        }

        // The supervisor has stopped; nothing else writes the state now
        lock_tracker(&self.subscriptions).close("Client disconnected");
        Self::transition(&self.state_tx, ConnectionEvent::ClosedByClient);
        metrics().mqtt_connection_lost();
        info!("MQTT client disconnected");
        Ok(())
    }
}

#[async_trait]
impl Broker for MqttClient {
    type Error = MqttError;

    fn is_ready(&self) -> bool {
        MqttClient::is_ready(self)
    }

    fn connection_state(&self) -> ConnectionState {
        MqttClient::connection_state(self)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, topic).await
    }

    async fn unsubscribe(&self, topic: &str) {
        MqttClient::unsubscribe(self, topic).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload).await
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Ok(mut guard) = self.event_loop_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
