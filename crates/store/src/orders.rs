//! Order repository trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{DomainError, Order};
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};

/// Repository for order records.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order, assigning its surrogate ID.
    async fn insert(&self, order: Order) -> Result<Order>;

    /// Loads an order by ID.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Loads an order by its human-readable number.
    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>>;

    /// Returns all orders of a user, oldest first.
    async fn for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Atomically mutates an order under the store's lock.
    ///
    /// The stored order is replaced only if the mutation succeeds; a rejected
    /// transition leaves it untouched. Returns the updated order.
    async fn update<F>(&self, id: OrderId, mutate: F) -> Result<Order>
    where
        F: FnOnce(&mut Order) -> std::result::Result<(), DomainError> + Send;

    /// Removes an order. Removing an absent order is a no-op.
    async fn remove(&self, id: OrderId) -> Result<()>;
}

#[derive(Default)]
struct OrderStoreState {
    orders: HashMap<i64, Order>,
    next_id: i64,
    fail_on_insert: bool,
}

/// In-memory order repository.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<OrderStoreState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to reject inserts, simulating an outage.
    pub async fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().await.fail_on_insert = fail;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, mut order: Order) -> Result<Order> {
        let mut state = self.state.write().await;
        if state.fail_on_insert {
            return Err(StoreError::Unavailable("order store down".to_string()));
        }

        state.next_id += 1;
        let id = state.next_id;
        order.assign_id(OrderId::new(id));
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id.as_i64()).cloned())
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.order_number() == order_number)
            .cloned())
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id().map(|id| id.as_i64()));
        Ok(orders)
    }

    async fn update<F>(&self, id: OrderId, mutate: F) -> Result<Order>
    where
        F: FnOnce(&mut Order) -> std::result::Result<(), DomainError> + Send,
    {
        let mut state = self.state.write().await;
        let current = state
            .orders
            .get(&id.as_i64())
            .ok_or_else(|| StoreError::NotFound {
                kind: "Order",
                id: id.to_string(),
            })?;

        let mut updated = current.clone();
        mutate(&mut updated)?;
        state.orders.insert(id.as_i64(), updated.clone());
        Ok(updated)
    }

    async fn remove(&self, id: OrderId) -> Result<()> {
        self.state.write().await.orders.remove(&id.as_i64());
        Ok(())
    }
}
