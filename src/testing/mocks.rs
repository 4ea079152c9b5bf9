//! Mock implementations for testing
//!
//! Provides a mock [`Broker`] that records every upstream call and lets tests
//! toggle readiness and inject failures.

use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::Broker;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type PublishedMessage = (String, Vec<u8>);

/// Mock broker for testing
#[derive(Debug)]
pub struct MockBroker {
    ready: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_publish: AtomicBool,
    pub subscribe_calls: Arc<Mutex<Vec<String>>>,
    pub unsubscribe_calls: Arc<Mutex<Vec<String>>>,
    pub publish_calls: Arc<Mutex<Vec<PublishedMessage>>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            fail_subscribe: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            subscribe_calls: Arc::new(Mutex::new(Vec::new())),
            unsubscribe_calls: Arc::new(Mutex::new(Vec::new())),
            publish_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockBroker {
    /// A connected broker that accepts every operation
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker whose upstream link is down
    pub fn not_ready() -> Self {
        let broker = Self::default();
        broker.set_ready(false);
        broker
    }

    pub fn with_subscribe_failure() -> Self {
        let broker = Self::default();
        broker.fail_subscribe.store(true, Ordering::SeqCst);
        broker
    }

    pub fn with_publish_failure() -> Self {
        let broker = Self::default();
        broker.fail_publish.store(true, Ordering::SeqCst);
        broker
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub async fn get_subscribe_calls(&self) -> Vec<String> {
        self.subscribe_calls.lock().await.clone()
    }

    pub async fn get_unsubscribe_calls(&self) -> Vec<String> {
        self.unsubscribe_calls.lock().await.clone()
    }

    pub async fn get_publish_calls(&self) -> Vec<PublishedMessage> {
        self.publish_calls.lock().await.clone()
    }

    /// Number of upstream operations of any kind
    pub async fn total_calls(&self) -> usize {
        self.subscribe_calls.lock().await.len()
            + self.unsubscribe_calls.lock().await.len()
            + self.publish_calls.lock().await.len()
    }

    pub async fn clear_history(&self) {
        self.subscribe_calls.lock().await.clear();
        self.unsubscribe_calls.lock().await.clear();
        self.publish_calls.lock().await.clear();
    }
}

#[async_trait]
impl Broker for MockBroker {
    type Error = MqttError;

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_ready() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("Mock broker offline".to_string())
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        self.subscribe_calls.lock().await.push(topic.to_string());

        if !self.is_ready() {
            return Err(MqttError::NotReady);
        }
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(MqttError::SubscriptionFailed {
                topic: topic.to_string(),
                reason: "Mock subscribe failure".to_string(),
            });
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) {
        self.unsubscribe_calls.lock().await.push(topic.to_string());
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        self.publish_calls
            .lock()
            .await
            .push((topic.to_string(), payload));

        if !self.is_ready() {
            return Err(MqttError::NotReady);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed {
                topic: topic.to_string(),
                reason: "Mock publish failure".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_broker_records_calls() {
        let broker = MockBroker::new();

        broker.subscribe("a/+").await.unwrap();
        broker.publish("a/b", b"on".to_vec()).await.unwrap();
        broker.unsubscribe("a/+").await;

        assert_eq!(broker.get_subscribe_calls().await, vec!["a/+"]);
        assert_eq!(
            broker.get_publish_calls().await,
            vec![("a/b".to_string(), b"on".to_vec())]
        );
        assert_eq!(broker.get_unsubscribe_calls().await, vec!["a/+"]);
        assert_eq!(broker.total_calls().await, 3);

        broker.clear_history().await;
        assert_eq!(broker.total_calls().await, 0);
    }

    #[tokio::test]
    async fn test_mock_broker_readiness_toggle() {
        let broker = MockBroker::not_ready();
        assert!(!broker.is_ready());
        assert!(matches!(
            broker.publish("a", vec![]).await,
            Err(MqttError::NotReady)
        ));

        broker.set_ready(true);
        assert!(broker.is_ready());
        assert_eq!(broker.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_mock_broker_failure_injection() {
        let broker = MockBroker::with_subscribe_failure();
        let err = broker.subscribe("x").await.unwrap_err();
        assert_eq!(err.to_string(), "Mock subscribe failure");

        let broker = MockBroker::with_publish_failure();
        let err = broker.publish("x", vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "Mock publish failure");
    }
}
