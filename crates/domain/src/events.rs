//! Integration events published on the bus.
//!
//! These are the cross-service schemas; each event knows the exchange and
//! routing key it travels under, so publishers never spell out topology
//! strings themselves.

use async_trait::async_trait;
use bus::{EventPublisher, EventPublisherExt, topology};
use chrono::{DateTime, Utc};
use common::{AddressId, Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::order::{Order, OrderLine, OrderStatus};

/// An event with a fixed place in the bus topology.
pub trait IntegrationEvent: Serialize + Sync {
    /// Exchange the event is published to.
    const EXCHANGE: &'static str;
    /// Routing key the event is published with.
    const ROUTING_KEY: &'static str;
}

/// Extension trait publishing integration events to their declared route.
#[async_trait]
pub trait PublishEventExt: EventPublisher {
    /// Publishes an event to its exchange under its routing key.
    async fn publish_event<E: IntegrationEvent>(&self, event: &E) -> bus::Result<()> {
        self.publish_json(E::EXCHANGE, E::ROUTING_KEY, event).await
    }
}

impl<T: EventPublisher + ?Sized> PublishEventExt for T {}

/// One order line as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemPayload {
    /// The product ordered.
    pub product_id: ProductId,
    /// Product name captured at ordering time.
    pub product_name: String,
    /// Quantity ordered.
    pub quantity: u32,
    /// Unit price captured at ordering time.
    pub unit_price: Money,
    /// Line subtotal at publication time.
    pub subtotal: Money,
}

impl From<&OrderLine> for OrderItemPayload {
    fn from(line: &OrderLine) -> Self {
        Self {
            product_id: line.product_id,
            product_name: line.product_name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            subtotal: line.subtotal(),
        }
    }
}

/// Published once an order is persisted with stock committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreated {
    /// Surrogate ID of the order.
    pub order_id: OrderId,
    /// Human-readable order number.
    pub order_number: String,
    /// Owning user.
    pub user_id: UserId,
    /// Order total at creation time.
    pub total_amount: Money,
    /// Shipping address reference.
    pub shipping_address_id: AddressId,
    /// The order lines.
    pub items: Vec<OrderItemPayload>,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
}

impl IntegrationEvent for OrderCreated {
    const EXCHANGE: &'static str = topology::ORDER_EXCHANGE;
    const ROUTING_KEY: &'static str = topology::ORDER_CREATED_KEY;
}

impl OrderCreated {
    /// Builds the event from a persisted order.
    pub fn from_order(order_id: OrderId, order: &Order) -> Self {
        Self {
            order_id,
            order_number: order.order_number().to_string(),
            user_id: order.user_id(),
            total_amount: order.total_amount(),
            shipping_address_id: order.shipping_address_id(),
            items: order.lines().iter().map(OrderItemPayload::from).collect(),
            created_at: order.created_at(),
        }
    }
}

/// Published when the gateway accepts a charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCompleted {
    /// External payment reference.
    pub payment_id: String,
    /// The order the payment settles.
    pub order_id: OrderId,
    /// The paying user.
    pub user_id: UserId,
    /// Charged amount.
    pub amount: Money,
    /// Gateway transaction ID.
    pub transaction_id: String,
    /// When the payment completed.
    pub completed_at: DateTime<Utc>,
}

impl IntegrationEvent for PaymentCompleted {
    const EXCHANGE: &'static str = topology::PAYMENT_EXCHANGE;
    const ROUTING_KEY: &'static str = topology::PAYMENT_COMPLETED_KEY;
}

/// Published when a charge is declined or payment processing errors.
///
/// `payment_id` is `None` when the failure happened before a payment record
/// existed; the reconciler then compensates by order ID alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailed {
    /// External payment reference, if a payment record exists.
    pub payment_id: Option<String>,
    /// The order whose payment failed.
    pub order_id: OrderId,
    /// Why the payment failed.
    pub error_message: String,
    /// When the payment failed.
    pub failed_at: DateTime<Utc>,
}

impl IntegrationEvent for PaymentFailed {
    const EXCHANGE: &'static str = topology::PAYMENT_EXCHANGE;
    const ROUTING_KEY: &'static str = topology::PAYMENT_FAILED_KEY;
}

impl PaymentFailed {
    /// Creates the event, stamped with the current time.
    pub fn now(
        payment_id: Option<String>,
        order_id: OrderId,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            payment_id,
            order_id,
            error_message: error_message.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Published on every order lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    /// Surrogate ID of the order.
    pub order_id: OrderId,
    /// Human-readable order number.
    pub order_number: String,
    /// Owning user.
    pub user_id: UserId,
    /// Status before the transition.
    pub old_status: OrderStatus,
    /// Status after the transition.
    pub new_status: OrderStatus,
    /// When the transition happened.
    pub changed_at: DateTime<Utc>,
}

impl IntegrationEvent for OrderStatusChanged {
    const EXCHANGE: &'static str = topology::ORDER_EXCHANGE;
    const ROUTING_KEY: &'static str = topology::ORDER_STATUS_CHANGED_KEY;
}

impl OrderStatusChanged {
    /// Builds the event from a transitioned order.
    pub fn from_order(order_id: OrderId, order: &Order, old_status: OrderStatus) -> Self {
        Self {
            order_id,
            order_number: order.order_number().to_string(),
            user_id: order.user_id(),
            old_status,
            new_status: order.status(),
            changed_at: Utc::now(),
        }
    }
}
