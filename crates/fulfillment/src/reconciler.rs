//! Order reconciler: converges order state with payment outcomes.

use async_trait::async_trait;
use bus::{EventPublisher, MessageEnvelope, MessageHandler, topology};
use common::OrderId;
use domain::{Order, OrderStatus, OrderStatusChanged, PaymentCompleted, PaymentFailed, PublishEventExt};
use store::OrderStore;

use crate::error::FulfillmentError;
use crate::inventory::InventoryPort;

/// Consumes payment outcome events and transitions order state.
///
/// Both handlers are safe under duplicate delivery: status transitions are
/// idempotent, and stock release is guarded by the order's release marker so
/// compensation happens logically once even when `PaymentFailed` is
/// redelivered or races a user-initiated cancellation.
pub struct OrderReconciler<S, I, B>
where
    S: OrderStore,
    I: InventoryPort,
    B: EventPublisher,
{
    orders: S,
    inventory: I,
    bus: B,
}

impl<S, I, B> OrderReconciler<S, I, B>
where
    S: OrderStore,
    I: InventoryPort,
    B: EventPublisher,
{
    /// Creates a new reconciler.
    pub fn new(orders: S, inventory: I, bus: B) -> Self {
        Self {
            orders,
            inventory,
            bus,
        }
    }

    /// Confirms the order for a completed payment.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn on_payment_completed(
        &self,
        event: &PaymentCompleted,
    ) -> Result<(), FulfillmentError> {
        tracing::info!(payment_id = %event.payment_id, "received payment completed event");

        let mut old_status = OrderStatus::Pending;
        let updated = self
            .orders
            .update(event.order_id, |order| {
                old_status = order.status();
                order.apply_payment_completed(&event.payment_id);
                Ok(())
            })
            .await?;

        if updated.status() == OrderStatus::Cancelled {
            // The user's cancellation won the race; the payment stays
            // recorded and must be refunded out of band.
            tracing::warn!(
                order_number = %updated.order_number(),
                payment_id = %event.payment_id,
                "payment completed for a cancelled order"
            );
        }

        if old_status != updated.status() {
            metrics::counter!("orders_confirmed_total").increment(1);
            tracing::info!(order_number = %updated.order_number(), "order confirmed");
            self.publish_status_change(event.order_id, &updated, old_status)
                .await?;
        }
        Ok(())
    }

    /// Cancels the order for a failed payment and releases its stock.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn on_payment_failed(&self, event: &PaymentFailed) -> Result<(), FulfillmentError> {
        tracing::info!(error = %event.error_message, "received payment failed event");

        let mut old_status = OrderStatus::Pending;
        let mut release = false;
        let updated = self
            .orders
            .update(event.order_id, |order| {
                old_status = order.status();
                release = order.apply_payment_failed(event.payment_id.as_deref());
                Ok(())
            })
            .await?;

        if release {
            for line in updated.lines() {
                self.inventory.release(line.product_id, line.quantity).await;
            }
        }

        if old_status != updated.status() {
            metrics::counter!("orders_cancelled_total").increment(1);
            tracing::info!(order_number = %updated.order_number(), "order cancelled");
            self.publish_status_change(event.order_id, &updated, old_status)
                .await?;
        }
        Ok(())
    }

    async fn publish_status_change(
        &self,
        order_id: OrderId,
        order: &Order,
        old_status: OrderStatus,
    ) -> Result<(), FulfillmentError> {
        self.bus
            .publish_event(&OrderStatusChanged::from_order(order_id, order, old_status))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<S, I, B> MessageHandler for OrderReconciler<S, I, B>
where
    S: OrderStore + 'static,
    I: InventoryPort + 'static,
    B: EventPublisher + 'static,
{
    async fn handle(&self, message: &MessageEnvelope) -> bus::Result<()> {
        match message.routing_key.as_str() {
            topology::PAYMENT_COMPLETED_KEY => {
                let event: PaymentCompleted = message.decode()?;
                self.on_payment_completed(&event).await?;
            }
            topology::PAYMENT_FAILED_KEY => {
                let event: PaymentFailed = message.decode()?;
                self.on_payment_failed(&event).await?;
            }
            other => {
                tracing::warn!(routing_key = other, "unexpected routing key, ignoring");
            }
        }
        Ok(())
    }
}
