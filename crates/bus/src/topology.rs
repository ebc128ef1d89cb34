//! Exchange, queue, and binding declarations.
//!
//! The broker topology is one explicit descriptor constructed at process
//! start and injected into the broker, rather than string literals scattered
//! through publishers and consumers.

/// Exchange carrying order lifecycle events.
pub const ORDER_EXCHANGE: &str = "order.exchange";
/// Exchange carrying payment outcome events.
pub const PAYMENT_EXCHANGE: &str = "payment.exchange";

/// Queue feeding the payment processor.
pub const ORDER_CREATED_QUEUE: &str = "order.created.queue";
/// Queue feeding the notification dispatcher.
pub const ORDER_STATUS_CHANGED_QUEUE: &str = "order.status.changed.queue";
/// Queue feeding the reconciler with successful payments.
pub const PAYMENT_COMPLETED_QUEUE: &str = "payment.completed.queue";
/// Queue feeding the reconciler with failed payments.
pub const PAYMENT_FAILED_QUEUE: &str = "payment.failed.queue";

/// Routing key for order creation events.
pub const ORDER_CREATED_KEY: &str = "order.created";
/// Routing key for order status transitions.
pub const ORDER_STATUS_CHANGED_KEY: &str = "order.status.changed";
/// Routing key for successful payments.
pub const PAYMENT_COMPLETED_KEY: &str = "payment.completed";
/// Routing key for failed payments.
pub const PAYMENT_FAILED_KEY: &str = "payment.failed";

/// Delivery attempts before a message is diverted to the dead-letter store.
pub const DEFAULT_MAX_DELIVERIES: u32 = 3;

/// A durable queue bound to an exchange by a routing key.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    /// Queue name.
    pub name: String,
    /// Exchange the queue is bound to.
    pub exchange: String,
    /// Routing key of the binding.
    pub routing_key: String,
    /// Dead-letter destination for messages that exhaust redelivery.
    pub dead_letter: Option<String>,
    /// Delivery attempts before dead-lettering.
    pub max_deliveries: u32,
}

impl QueueSpec {
    /// Declares a queue bound to `exchange` with `routing_key`, dead-lettering
    /// to `<name>.dlq` after [`DEFAULT_MAX_DELIVERIES`] attempts.
    pub fn bind(
        name: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let dead_letter = Some(format!("{name}.dlq"));
        Self {
            name,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            dead_letter,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }
}

/// Declares the exchanges and queue bindings a broker serves.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    exchanges: Vec<String>,
    queues: Vec<QueueSpec>,
}

impl Topology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an exchange.
    pub fn exchange(mut self, name: impl Into<String>) -> Self {
        self.exchanges.push(name.into());
        self
    }

    /// Declares a queue binding.
    pub fn queue(mut self, spec: QueueSpec) -> Self {
        self.queues.push(spec);
        self
    }

    /// The standard fulfillment topology: the order and payment exchanges
    /// with one queue per saga event, every queue carrying a dead-letter
    /// route.
    pub fn fulfillment() -> Self {
        Self::new()
            .exchange(ORDER_EXCHANGE)
            .exchange(PAYMENT_EXCHANGE)
            .queue(QueueSpec::bind(
                ORDER_CREATED_QUEUE,
                ORDER_EXCHANGE,
                ORDER_CREATED_KEY,
            ))
            .queue(QueueSpec::bind(
                ORDER_STATUS_CHANGED_QUEUE,
                ORDER_EXCHANGE,
                ORDER_STATUS_CHANGED_KEY,
            ))
            .queue(QueueSpec::bind(
                PAYMENT_COMPLETED_QUEUE,
                PAYMENT_EXCHANGE,
                PAYMENT_COMPLETED_KEY,
            ))
            .queue(QueueSpec::bind(
                PAYMENT_FAILED_QUEUE,
                PAYMENT_EXCHANGE,
                PAYMENT_FAILED_KEY,
            ))
    }

    /// Returns true if the exchange is declared.
    pub fn has_exchange(&self, name: &str) -> bool {
        self.exchanges.iter().any(|e| e == name)
    }

    /// Returns all declared queues.
    pub fn queues(&self) -> &[QueueSpec] {
        &self.queues
    }

    /// Looks up a queue by name.
    pub fn queue_spec(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Returns the queues bound to `(exchange, routing_key)`.
    pub fn routes<'a>(
        &'a self,
        exchange: &'a str,
        routing_key: &'a str,
    ) -> impl Iterator<Item = &'a QueueSpec> {
        self.queues
            .iter()
            .filter(move |q| q.exchange == exchange && q.routing_key == routing_key)
    }
}
