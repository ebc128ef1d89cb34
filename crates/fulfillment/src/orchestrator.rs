//! Order orchestrator: the synchronous half of the fulfillment saga.

use bus::EventPublisher;
use common::{AddressId, OrderId, ProductId, UserId};
use domain::{Order, OrderCreated, OrderLine, OrderStatus, OrderStatusChanged, PublishEventExt};
use store::OrderStore;

use crate::cart::{CartLine, CartPort};
use crate::error::FulfillmentError;
use crate::inventory::InventoryPort;

/// Builds orders from carts with full rollback on partial failure.
///
/// The forward path reserves stock line by line, accumulating the completed
/// reservations in memory; any later failure walks that list and releases
/// each reservation, so the caller either gets a fully created order or
/// zero net stock and order side effects.
pub struct OrderOrchestrator<C, I, S, B>
where
    C: CartPort,
    I: InventoryPort,
    S: OrderStore,
    B: EventPublisher,
{
    cart: C,
    inventory: I,
    orders: S,
    bus: B,
}

impl<C, I, S, B> OrderOrchestrator<C, I, S, B>
where
    C: CartPort,
    I: InventoryPort,
    S: OrderStore,
    B: EventPublisher,
{
    /// Creates a new orchestrator.
    pub fn new(cart: C, inventory: I, orders: S, bus: B) -> Self {
        Self {
            cart,
            inventory,
            orders,
            bus,
        }
    }

    /// Creates an order from the user's current cart.
    ///
    /// Reserves stock for every cart line in cart order, persists the order
    /// in `Pending`, clears the cart, and publishes `OrderCreated`. If any
    /// line cannot be reserved the already-made reservations are released
    /// and the call fails with [`FulfillmentError::OutOfStock`] naming the
    /// offending product; failures after reservation (store, broker) roll
    /// back the same way and remove any persisted record.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        shipping_address_id: AddressId,
    ) -> Result<Order, FulfillmentError> {
        tracing::info!(%user_id, "creating order");
        let start = std::time::Instant::now();

        let lines = self.cart.lines(user_id).await?;
        if lines.is_empty() {
            return Err(FulfillmentError::InvalidRequest("Cart is empty".to_string()));
        }

        let mut reserved: Vec<(ProductId, u32)> = Vec::with_capacity(lines.len());
        for line in &lines {
            if !self.inventory.reserve(line.product_id, line.quantity).await {
                self.rollback_reservations(&reserved).await;
                metrics::counter!("orders_out_of_stock_total").increment(1);
                return Err(FulfillmentError::OutOfStock {
                    product_name: line.product_name.clone(),
                });
            }
            reserved.push((line.product_id, line.quantity));
        }

        match self.persist_and_publish(user_id, shipping_address_id, lines).await {
            Ok(order) => {
                metrics::counter!("orders_created_total").increment(1);
                metrics::histogram!("order_creation_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(order_number = %order.order_number(), "order created");
                Ok(order)
            }
            Err(e) => {
                self.rollback_reservations(&reserved).await;
                Err(e)
            }
        }
    }

    /// Loads an order, checking it belongs to the caller.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, FulfillmentError> {
        let order = self.load(order_id).await?;
        self.check_owner(&order, user_id)?;
        Ok(order)
    }

    /// Loads an order by its human-readable number.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<Order, FulfillmentError> {
        self.orders
            .get_by_number(order_number)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound {
                kind: "Order",
                id: order_number.to_string(),
            })
    }

    /// Returns all orders of a user, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, FulfillmentError> {
        Ok(self.orders.for_user(user_id).await?)
    }

    /// Cancels an order on the user's behalf.
    ///
    /// Permitted only while the order is `Pending` or `Confirmed`; the
    /// reserved stock of every line is released exactly as on the payment
    /// failure path, at most once per order.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
    ) -> Result<Order, FulfillmentError> {
        tracing::info!(%order_id, %user_id, "cancelling order");

        let order = self.load(order_id).await?;
        self.check_owner(&order, user_id)?;

        let mut old_status = order.status();
        let mut release = false;
        let updated = self
            .orders
            .update(order_id, |order| {
                old_status = order.status();
                release = order.cancel()?;
                Ok(())
            })
            .await?;

        if release {
            self.release_lines(&updated).await;
        }
        metrics::counter!("orders_cancelled_total").increment(1);

        self.publish_status_change(order_id, &updated, old_status).await?;
        Ok(updated)
    }

    /// Marks a confirmed order as handed to the carrier.
    #[tracing::instrument(skip(self))]
    pub async fn ship_order(&self, order_id: OrderId) -> Result<Order, FulfillmentError> {
        self.transition(order_id, |order| order.ship()).await
    }

    /// Marks a shipped order as delivered.
    #[tracing::instrument(skip(self))]
    pub async fn deliver_order(&self, order_id: OrderId) -> Result<Order, FulfillmentError> {
        self.transition(order_id, |order| order.deliver()).await
    }

    async fn persist_and_publish(
        &self,
        user_id: UserId,
        shipping_address_id: AddressId,
        lines: Vec<CartLine>,
    ) -> Result<Order, FulfillmentError> {
        let lines: Vec<OrderLine> = lines
            .iter()
            .map(|line| {
                OrderLine::new(
                    line.product_id,
                    line.product_name.clone(),
                    line.quantity,
                    line.unit_price,
                )
            })
            .collect();

        let order = Order::place(user_id, shipping_address_id, lines)?;
        let order = self.orders.insert(order).await?;
        let order_id = order.id().ok_or_else(|| {
            FulfillmentError::Infrastructure("order id missing after insert".to_string())
        })?;

        // The saga only progresses once the creation event is out; a failure
        // here undoes the insert so the order is not considered created.
        if let Err(e) = self.clear_and_publish(user_id, order_id, &order).await {
            self.orders.remove(order_id).await?;
            return Err(e);
        }

        Ok(order)
    }

    async fn clear_and_publish(
        &self,
        user_id: UserId,
        order_id: OrderId,
        order: &Order,
    ) -> Result<(), FulfillmentError> {
        self.cart.clear(user_id).await?;
        self.bus
            .publish_event(&OrderCreated::from_order(order_id, order))
            .await?;
        tracing::info!(order_number = %order.order_number(), "published order created event");
        Ok(())
    }

    async fn rollback_reservations(&self, reserved: &[(ProductId, u32)]) {
        if reserved.is_empty() {
            return;
        }
        tracing::warn!(count = reserved.len(), "rolling back stock reservations");
        for (product_id, quantity) in reserved {
            self.inventory.release(*product_id, *quantity).await;
        }
    }

    async fn release_lines(&self, order: &Order) {
        for line in order.lines() {
            self.inventory.release(line.product_id, line.quantity).await;
        }
    }

    async fn transition(
        &self,
        order_id: OrderId,
        apply: impl FnOnce(&mut Order) -> Result<(), domain::DomainError> + Send,
    ) -> Result<Order, FulfillmentError> {
        let mut old_status = OrderStatus::Pending;
        let updated = self
            .orders
            .update(order_id, |order| {
                old_status = order.status();
                apply(order)
            })
            .await?;

        self.publish_status_change(order_id, &updated, old_status).await?;
        Ok(updated)
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

    async fn load(&self, order_id: OrderId) -> Result<Order, FulfillmentError> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound {
                kind: "Order",
                id: order_id.to_string(),
            })
    }

    fn check_owner(&self, order: &Order, user_id: UserId) -> Result<(), FulfillmentError> {
        if order.user_id() != user_id {
            return Err(FulfillmentError::InvalidRequest(
                "Order does not belong to user".to_string(),
            ));
        }
        Ok(())
    }
}
