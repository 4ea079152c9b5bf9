//! Client registry shared by sessions and the router
//!
//! Each connected browser client owns an outbound frame channel and a set of
//! topic strings (literal topics or wildcard patterns). The registry is the
//! only mutable routing state in the bridge; every mutation and every fan-out
//! pass goes through its lock.
//!
//! Upstream subscribe and unsubscribe decisions for one topic string are
//! serialized through [`ClientRegistry::lock_topic`]: a session holds the
//! topic guard from the registry change until the broker call returns, so an
//! orphan check can never act on a topic another client just took.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, Weak};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::topics::topic_matches;

/// Identifier of one browser connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound side of a registered client
#[derive(Debug)]
pub struct ClientHandle {
    sender: mpsc::UnboundedSender<String>,
    subscriptions: HashSet<String>,
}

impl ClientHandle {
    fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            sender,
            subscriptions: HashSet::new(),
        }
    }

    /// Whether the client's writer is still draining frames
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue a text frame; false once the connection is gone
    pub fn send(&self, frame: String) -> bool {
        self.sender.send(frame).is_ok()
    }

    /// Whether any entry of the set matches the topic, literally or by pattern
    pub fn interested_in(&self, topic: &str) -> bool {
        self.subscriptions.contains(topic)
            || self
                .subscriptions
                .iter()
                .any(|pattern| topic_matches(pattern, topic))
    }

    pub fn subscriptions(&self) -> &HashSet<String> {
        &self.subscriptions
    }
}

/// Held while a topic's upstream state is being changed
#[derive(Debug)]
pub struct TopicGuard {
    _guard: OwnedMutexGuard<()>,
}

/// One async lock per topic string, dropped once nobody holds it
#[derive(Debug, Default)]
struct TopicLocks {
    locks: std::sync::Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl TopicLocks {
    fn handle(&self, topic: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(topic).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(topic.to_string(), Arc::downgrade(&lock));
        lock
    }

    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Registry of connected clients and their subscription sets
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    topic_locks: Arc<TopicLocks>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive rights to change `topic` upstream
    pub async fn lock_topic(&self, topic: &str) -> TopicGuard {
        let lock = self.topic_locks.handle(topic);
        TopicGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Lock several topics, always in sorted order
    pub async fn lock_topics(&self, topics: &[String]) -> Vec<TopicGuard> {
        let mut sorted: Vec<&String> = topics.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for topic in sorted {
            guards.push(self.lock_topic(topic).await);
        }
        guards
    }

    /// Register a client with an empty subscription set
    pub async fn add_client(&self, id: ClientId, sender: mpsc::UnboundedSender<String>) {
        let mut clients = self.clients.write().await;
        clients.insert(id, ClientHandle::new(sender));
        info!(client_id = %id, total = clients.len(), "Client registered");
    }

    /// Drop a client and its subscription set, returning the set
    pub async fn remove_client(&self, id: &ClientId) -> Option<HashSet<String>> {
        let mut clients = self.clients.write().await;
        let removed = clients.remove(id).map(|handle| handle.subscriptions);
        if removed.is_some() {
            info!(client_id = %id, total = clients.len(), "Client removed");
        }
        removed
    }

    /// Add a topic to a client's set; false when the client is unknown
    pub async fn add_subscription(&self, id: &ClientId, topic: &str) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get_mut(id) {
            Some(handle) => {
                handle.subscriptions.insert(topic.to_string());
                debug!(client_id = %id, topic = %topic, "Subscription added");
                true
            }
            None => false,
        }
    }

    /// Remove a topic from a client's set; false when it was not there
    pub async fn remove_subscription(&self, id: &ClientId, topic: &str) -> bool {
        let mut clients = self.clients.write().await;
        clients
            .get_mut(id)
            .map(|handle| handle.subscriptions.remove(topic))
            .unwrap_or(false)
    }

    /// Remove a topic from a client's set and report whether no client holds
    /// that exact string any more
    pub async fn release_topic(&self, id: &ClientId, topic: &str) -> bool {
        let mut clients = self.clients.write().await;
        if let Some(handle) = clients.get_mut(id) {
            handle.subscriptions.remove(topic);
        }
        !Self::held_by_any(&clients, topic)
    }

    /// Remove a client and return the topics it held that nobody else holds
    pub async fn release_client(&self, id: &ClientId) -> Vec<String> {
        let mut clients = self.clients.write().await;
        let Some(handle) = clients.remove(id) else {
            return Vec::new();
        };
        info!(client_id = %id, total = clients.len(), "Client removed");

        let mut orphaned: Vec<String> = handle
            .subscriptions
            .into_iter()
            .filter(|topic| !Self::held_by_any(&clients, topic))
            .collect();
        orphaned.sort();
        orphaned
    }

    /// Exact-string membership across every client's set
    pub async fn has_any_subscriber(&self, topic: &str) -> bool {
        let clients = self.clients.read().await;
        Self::held_by_any(&clients, topic)
    }

    fn held_by_any(clients: &HashMap<ClientId, ClientHandle>, topic: &str) -> bool {
        clients
            .values()
            .any(|handle| handle.subscriptions.contains(topic))
    }

    /// Visit every registered client under the read lock
    pub async fn for_each_client<F>(&self, mut visit: F)
    where
        F: FnMut(&ClientId, &ClientHandle),
    {
        let clients = self.clients.read().await;
        for (id, handle) in clients.iter() {
            visit(id, handle);
        }
    }

    /// Queue a frame for one client; false when it is unknown or closed
    pub async fn send_to(&self, id: &ClientId, frame: String) -> bool {
        let clients = self.clients.read().await;
        clients
            .get(id)
            .map(|handle| handle.send(frame))
            .unwrap_or(false)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn contains(&self, id: &ClientId) -> bool {
        self.clients.read().await.contains_key(id)
    }

    /// Sorted copy of a client's subscription set
    pub async fn subscriptions_of(&self, id: &ClientId) -> Option<Vec<String>> {
        let clients = self.clients.read().await;
        clients.get(id).map(|handle| {
            let mut topics: Vec<String> = handle.subscriptions.iter().cloned().collect();
            topics.sort();
            topics
        })
    }
}
