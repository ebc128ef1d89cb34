//! Publisher/consumer seams and the in-memory broker.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::envelope::MessageEnvelope;
use crate::error::{BusError, Result};
use crate::topology::{QueueSpec, Topology};

/// Publish seam injected into event producers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a payload to an exchange under a routing key.
    ///
    /// Returns once the broker has accepted the message; delivery to bound
    /// queues happens asynchronously and at-least-once.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> Result<()>;
}

/// Extension trait providing typed publication.
#[async_trait]
pub trait EventPublisherExt: EventPublisher {
    /// Serializes an event and publishes it.
    async fn publish_json<T: Serialize + Sync>(
        &self,
        exchange: &str,
        routing_key: &str,
        event: &T,
    ) -> Result<()> {
        let payload = serde_json::to_value(event)?;
        self.publish(exchange, routing_key, payload).await
    }
}

impl<T: EventPublisher + ?Sized> EventPublisherExt for T {}

/// A consumer bound to a queue.
///
/// Returning an error requeues the delivery; once the queue's redelivery
/// limit is exhausted the message is dead-lettered.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one delivery.
    async fn handle(&self, message: &MessageEnvelope) -> Result<()>;
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<MessageEnvelope>>,
    dead_letters: HashMap<String, Vec<MessageEnvelope>>,
}

/// In-memory broker with at-least-once delivery semantics.
///
/// Stands in for an external AMQP broker: fan-out to every queue bound to
/// the routing key, redelivery on handler failure, dead-lettering once the
/// per-queue limit is exhausted. Dispatch runs either inline through
/// [`InMemoryBroker::run_pending`] (deterministic, for tests) or on a
/// spawned task through [`InMemoryBroker::spawn_dispatcher`].
#[derive(Clone)]
pub struct InMemoryBroker {
    topology: Arc<Topology>,
    state: Arc<RwLock<BrokerState>>,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn MessageHandler>>>>,
}

impl InMemoryBroker {
    /// Creates a broker serving the given topology.
    pub fn new(topology: Topology) -> Self {
        let mut state = BrokerState::default();
        for queue in topology.queues() {
            state.queues.insert(queue.name.clone(), VecDeque::new());
        }
        Self {
            topology: Arc::new(topology),
            state: Arc::new(RwLock::new(state)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the topology this broker serves.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Binds a consumer to a queue, replacing any previous one.
    pub async fn register_handler(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        if self.topology.queue_spec(queue).is_none() {
            return Err(BusError::UnknownQueue(queue.to_string()));
        }
        self.handlers.write().await.insert(queue.to_string(), handler);
        Ok(())
    }

    /// Delivers queued messages to their handlers until no deliverable
    /// message remains. Returns the number of delivery attempts made.
    ///
    /// Messages on queues without a registered handler stay queued.
    pub async fn run_pending(&self) -> usize {
        let mut attempts = 0;
        while let Some((spec, handler, message)) = self.next_delivery().await {
            attempts += 1;
            metrics::counter!("bus_deliveries_total").increment(1);

            match handler.handle(&message).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(
                        queue = %spec.name,
                        message_id = %message.message_id,
                        delivery_count = message.delivery_count + 1,
                        error = %e,
                        "delivery failed"
                    );
                    self.requeue_or_dead_letter(&spec, message).await;
                }
            }
        }
        attempts
    }

    /// Spawns a background dispatcher that keeps draining queues.
    pub fn spawn_dispatcher(&self) -> tokio::task::JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            loop {
                if broker.run_pending().await == 0 {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            }
        })
    }

    /// Returns the number of messages waiting on a queue.
    pub async fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .read()
            .await
            .queues
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Returns the messages dead-lettered from a queue.
    pub async fn dead_letters_for(&self, queue: &str) -> Vec<MessageEnvelope> {
        let route = match self.topology.queue_spec(queue).and_then(|s| s.dead_letter.clone()) {
            Some(route) => route,
            None => return Vec::new(),
        };
        self.state
            .read()
            .await
            .dead_letters
            .get(&route)
            .cloned()
            .unwrap_or_default()
    }

    async fn next_delivery(
        &self,
    ) -> Option<(QueueSpec, Arc<dyn MessageHandler>, MessageEnvelope)> {
        let handlers = self.handlers.read().await;
        let mut state = self.state.write().await;
        for spec in self.topology.queues() {
            let Some(handler) = handlers.get(&spec.name) else {
                continue;
            };
            if let Some(message) = state.queues.get_mut(&spec.name).and_then(VecDeque::pop_front)
            {
                return Some((spec.clone(), handler.clone(), message));
            }
        }
        None
    }

    async fn requeue_or_dead_letter(&self, spec: &QueueSpec, mut message: MessageEnvelope) {
        message.delivery_count += 1;
        let mut state = self.state.write().await;

        if message.delivery_count >= spec.max_deliveries {
            metrics::counter!("bus_dead_lettered_total").increment(1);
            match &spec.dead_letter {
                Some(route) => {
                    tracing::error!(
                        queue = %spec.name,
                        dead_letter = %route,
                        message_id = %message.message_id,
                        "redelivery limit exhausted, dead-lettering"
                    );
                    state
                        .dead_letters
                        .entry(route.clone())
                        .or_default()
                        .push(message);
                }
                None => {
                    tracing::error!(
                        queue = %spec.name,
                        message_id = %message.message_id,
                        "redelivery limit exhausted and no dead-letter route, dropping"
                    );
                }
            }
        } else if let Some(queue) = state.queues.get_mut(&spec.name) {
            queue.push_back(message);
        }
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        if !self.topology.has_exchange(exchange) {
            return Err(BusError::UnknownExchange(exchange.to_string()));
        }

        let envelope = MessageEnvelope::new(exchange, routing_key, payload);
        let mut state = self.state.write().await;
        let mut bound = 0;
        for spec in self.topology.routes(exchange, routing_key) {
            if let Some(queue) = state.queues.get_mut(&spec.name) {
                queue.push_back(envelope.clone());
                bound += 1;
            }
        }

        metrics::counter!("bus_messages_published_total").increment(1);
        if bound == 0 {
            // Matches AMQP semantics: an unbound routing key is not an error.
            tracing::debug!(exchange, routing_key, "published message matched no queue");
        }
        Ok(())
    }
}
