//! Central message bus: registration, pub/sub, broadcast, and
//! request/response correlation with timeout.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use super::handler::{BoxedHandler, SubscriptionId};
use super::message::{AgentMessage, EventKind};
use crate::config::BusConfig;
use crate::error::{MeshError, Result};

type HandlerList = Vec<(SubscriptionId, BoxedHandler)>;

/// Snapshot of bus activity counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusStats {
    pub messages_sent: u64,
    pub deliveries: u64,
    pub broadcasts: u64,
    pub topic_publishes: u64,
    pub expired_dropped: u64,
    pub unroutable_dropped: u64,
    pub responses_correlated: u64,
    pub error_responses_synthesized: u64,
    pub response_timeouts: u64,
}

#[derive(Debug, Default)]
struct BusCounters {
    messages_sent: AtomicU64,
    deliveries: AtomicU64,
    broadcasts: AtomicU64,
    topic_publishes: AtomicU64,
    expired_dropped: AtomicU64,
    unroutable_dropped: AtomicU64,
    responses_correlated: AtomicU64,
    error_responses_synthesized: AtomicU64,
    response_timeouts: AtomicU64,
}

impl BusCounters {
    fn snapshot(&self) -> BusStats {
        BusStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            topic_publishes: self.topic_publishes.load(Ordering::Relaxed),
            expired_dropped: self.expired_dropped.load(Ordering::Relaxed),
            unroutable_dropped: self.unroutable_dropped.load(Ordering::Relaxed),
            responses_correlated: self.responses_correlated.load(Ordering::Relaxed),
            error_responses_synthesized: self.error_responses_synthesized.load(Ordering::Relaxed),
            response_timeouts: self.response_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Central dispatcher between registered agents.
///
/// All shared state sits behind `parking_lot` locks; no lock is held across
/// an `.await`. Handler lists are snapshotted under the lock and invoked
/// after release, so handlers may re-enter the bus (for example to send a
/// response inline).
pub struct MessageBus {
    default_timeout: Duration,
    registered: RwLock<HashSet<String>>,
    agent_handlers: RwLock<HashMap<String, HandlerList>>,
    topic_handlers: RwLock<HashMap<String, HandlerList>>,
    taps: RwLock<HandlerList>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<AgentMessage>>>,
    next_subscription: AtomicU64,
    counters: BusCounters,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            registered: RwLock::new(HashSet::new()),
            agent_handlers: RwLock::new(HashMap::new()),
            topic_handlers: RwLock::new(HashMap::new()),
            taps: RwLock::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
            counters: BusCounters::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default())
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn stats(&self) -> BusStats {
        self.counters.snapshot()
    }

    // --- registration ---

    /// Register an agent id. Idempotent: a redundant call warns and changes
    /// nothing.
    pub fn register_agent(&self, id: &str) -> bool {
        let inserted = self.registered.write().insert(id.to_string());
        if inserted {
            debug!(agent = %id, "agent registered");
        } else {
            warn!(agent = %id, "agent already registered");
        }
        inserted
    }

    /// Unregister an agent id, dropping its handler list so no stale
    /// references survive.
    pub fn unregister_agent(&self, id: &str) -> bool {
        let removed = self.registered.write().remove(id);
        if removed {
            self.agent_handlers.write().remove(id);
            debug!(agent = %id, "agent unregistered");
        } else {
            warn!(agent = %id, "agent not registered");
        }
        removed
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.registered.read().contains(id)
    }

    pub fn registered_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registered.read().iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn agent_count(&self) -> usize {
        self.registered.read().len()
    }

    // --- subscriptions ---

    pub fn subscribe_to_agent(&self, id: &str, handler: BoxedHandler) -> SubscriptionId {
        let subscription = self.next_id();
        self.agent_handlers
            .write()
            .entry(id.to_string())
            .or_default()
            .push((subscription, handler));
        subscription
    }

    pub fn unsubscribe_from_agent(&self, id: &str, subscription: SubscriptionId) -> bool {
        Self::remove_subscription(&mut self.agent_handlers.write(), id, subscription)
    }

    /// Topic subscriptions are independent of agent registration.
    pub fn subscribe_to_topic(&self, topic: &str, handler: BoxedHandler) -> SubscriptionId {
        let subscription = self.next_id();
        self.topic_handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((subscription, handler));
        subscription
    }

    pub fn unsubscribe_from_topic(&self, topic: &str, subscription: SubscriptionId) -> bool {
        Self::remove_subscription(&mut self.topic_handlers.write(), topic, subscription)
    }

    /// Attach an observer invoked for every message that passes the expiry
    /// check, before routing.
    pub fn add_tap(&self, handler: BoxedHandler) -> SubscriptionId {
        let subscription = self.next_id();
        self.taps.write().push((subscription, handler));
        subscription
    }

    pub fn remove_tap(&self, subscription: SubscriptionId) -> bool {
        let mut taps = self.taps.write();
        let before = taps.len();
        taps.retain(|(id, _)| *id != subscription);
        taps.len() != before
    }

    // --- routing ---

    /// Route a message. Never fails: routing problems are logged, counted,
    /// and (for response-requiring messages to unknown destinations) turned
    /// into a synthesized error response sent back through the same
    /// algorithm.
    pub async fn send_message(&self, message: AgentMessage) {
        let mut message = message;
        loop {
            if message.is_expired() {
                self.counters.expired_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    message_id = %message.message_id,
                    source = %message.source,
                    destination = %message.destination,
                    "dropping expired message"
                );
                return;
            }

            self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
            self.notify_taps(&message).await;

            if message.is_broadcast() {
                self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
                let mut targets: Vec<String> = {
                    let registered = self.registered.read();
                    registered
                        .iter()
                        .filter(|id| **id != message.source)
                        .cloned()
                        .collect()
                };
                targets.sort();
                for target in targets {
                    self.dispatch_to_agent(&target, &message).await;
                }
                return;
            }

            if message.kind == EventKind::Response {
                if let Some(correlation_id) = message.correlation_id {
                    // Resolution sends the reply under the pending-table
                    // lock, so "entry absent" always implies "reply already
                    // delivered".
                    let resolved = {
                        let mut pending = self.pending.lock();
                        match pending.remove(&correlation_id) {
                            Some(waiter) => {
                                let _ = waiter.send(message.clone());
                                true
                            }
                            None => false,
                        }
                    };
                    if resolved {
                        self.counters
                            .responses_correlated
                            .fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
                // Uncorrelated (or late) responses fall through to normal
                // directed routing.
            }

            if !self.is_registered(&message.destination) {
                if message.requires_response {
                    warn!(
                        message_id = %message.message_id,
                        destination = %message.destination,
                        "destination not registered, synthesizing error response"
                    );
                    self.counters
                        .error_responses_synthesized
                        .fetch_add(1, Ordering::Relaxed);
                    message = AgentMessage::error_response(
                        &message,
                        "destination_not_found",
                        format!("agent '{}' is not registered", message.destination),
                        None,
                    );
                    continue;
                }
                self.counters
                    .unroutable_dropped
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    message_id = %message.message_id,
                    destination = %message.destination,
                    "dropping message to unregistered destination"
                );
                return;
            }

            let destination = message.destination.clone();
            self.dispatch_to_agent(&destination, &message).await;
            return;
        }
    }

    /// Send a message that expects exactly one correlated RESPONSE, using
    /// the bus default timeout.
    pub async fn send_with_response(&self, message: AgentMessage) -> Result<AgentMessage> {
        self.send_with_response_within(message, self.default_timeout)
            .await
    }

    /// Like [`send_with_response`](Self::send_with_response) with an explicit
    /// timeout. Exactly one of {resolve with the correlated RESPONSE, reject
    /// with [`MeshError::ResponseTimeout`]} occurs per call.
    pub async fn send_with_response_within(
        &self,
        mut message: AgentMessage,
        timeout: Duration,
    ) -> Result<AgentMessage> {
        message.requires_response = true;
        let message_id = message.message_id;

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(message_id, sender);
        // The guard removes the pending entry if the caller is cancelled or
        // the timer fires; a resolved entry has already been removed.
        let guard = PendingGuard {
            bus: self,
            id: Some(message_id),
        };

        self.send_message(message).await;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => {
                guard.disarm();
                Ok(reply)
            }
            Ok(Err(_)) => Err(MeshError::Messaging("response channel closed".into())),
            Err(_) => {
                drop(guard);
                self.counters
                    .response_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                Err(MeshError::ResponseTimeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Deliver to topic subscribers only; independent of the registration
    /// and routing rules (taps do not observe topic traffic).
    pub async fn publish_to_topic(&self, topic: &str, message: AgentMessage) {
        self.counters.topic_publishes.fetch_add(1, Ordering::Relaxed);
        let handlers = Self::snapshot(&self.topic_handlers.read(), topic);
        for handler in handlers {
            if let Err(e) = handler.handle(&message).await {
                warn!(topic = %topic, error = %e, "topic handler failed");
            }
            self.counters.deliveries.fetch_add(1, Ordering::Relaxed);
        }
    }

    // --- internals ---

    async fn dispatch_to_agent(&self, agent_id: &str, message: &AgentMessage) {
        let handlers = Self::snapshot(&self.agent_handlers.read(), agent_id);
        for handler in handlers {
            if let Err(e) = handler.handle(message).await {
                warn!(
                    agent = %agent_id,
                    message_id = %message.message_id,
                    error = %e,
                    "message handler failed"
                );
            }
            self.counters.deliveries.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn notify_taps(&self, message: &AgentMessage) {
        let taps: Vec<BoxedHandler> = self
            .taps
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for tap in taps {
            if let Err(e) = tap.handle(message).await {
                warn!(message_id = %message.message_id, error = %e, "tap failed");
            }
        }
    }

    fn snapshot(map: &HashMap<String, HandlerList>, key: &str) -> Vec<BoxedHandler> {
        map.get(key)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    fn remove_subscription(
        map: &mut HashMap<String, HandlerList>,
        key: &str,
        subscription: SubscriptionId,
    ) -> bool {
        let Some(handlers) = map.get_mut(key) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            map.remove(key);
        }
        removed
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed))
    }
}

struct PendingGuard<'a> {
    bus: &'a MessageBus,
    id: Option<Uuid>,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.bus.pending.lock().remove(&id);
        }
    }
}
