//! Shopping-cart port and in-memory implementation.
//!
//! The cart is an external collaborator: the orchestrator only ever reads
//! the current lines and clears them after a successful order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, ProductId, UserId};
use tokio::sync::RwLock;

use crate::error::FulfillmentError;

/// One line of a user's cart, with name and price captured at add time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    /// The product in the cart.
    pub product_id: ProductId,
    /// Product name at the time it was added.
    pub product_name: String,
    /// Quantity in the cart.
    pub quantity: u32,
    /// Unit price at the time it was added.
    pub unit_price: Money,
}

impl CartLine {
    /// Creates a new cart line.
    pub fn new(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }
}

/// Remote port to the cart service.
#[async_trait]
pub trait CartPort: Send + Sync {
    /// Returns the user's current cart lines, in cart order.
    async fn lines(&self, user_id: UserId) -> Result<Vec<CartLine>, FulfillmentError>;

    /// Empties the user's cart.
    async fn clear(&self, user_id: UserId) -> Result<(), FulfillmentError>;
}

/// In-memory cart service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCart {
    carts: Arc<RwLock<HashMap<UserId, Vec<CartLine>>>>,
}

impl InMemoryCart {
    /// Creates an empty cart service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a user's cart contents.
    pub async fn set_lines(&self, user_id: UserId, lines: Vec<CartLine>) {
        self.carts.write().await.insert(user_id, lines);
    }
}

#[async_trait]
impl CartPort for InMemoryCart {
    async fn lines(&self, user_id: UserId) -> Result<Vec<CartLine>, FulfillmentError> {
        Ok(self
            .carts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, user_id: UserId) -> Result<(), FulfillmentError> {
        self.carts.write().await.remove(&user_id);
        Ok(())
    }
}
