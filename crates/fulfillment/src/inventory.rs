//! Inventory reservation port and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProductId;
use tokio::sync::RwLock;

/// Remote port to the inventory service.
#[async_trait]
pub trait InventoryPort: Send + Sync {
    /// Atomically decrements available stock if enough is on hand.
    ///
    /// Returns `false` (not an error) on insufficient stock, and also when
    /// the inventory service is unreachable (the defined fallback), so the
    /// caller treats both as out-of-stock and compensates.
    async fn reserve(&self, product_id: ProductId, quantity: u32) -> bool;

    /// Atomically returns stock.
    ///
    /// Safe to call even when the matching reservation's effect is
    /// uncertain; the port never raises.
    async fn release(&self, product_id: ProductId, quantity: u32);
}

#[derive(Debug, Default)]
struct InventoryState {
    stock: HashMap<ProductId, u32>,
    unreachable: bool,
}

/// In-memory inventory service.
///
/// The write lock held across each read-modify-write plays the role of the
/// product row lock: two concurrent reservations for the same product can
/// never both succeed when only one has enough stock. Release takes the same
/// lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventory {
    state: Arc<RwLock<InventoryState>>,
}

impl InMemoryInventory {
    /// Creates an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the available stock for a product.
    pub async fn set_stock(&self, product_id: ProductId, quantity: u32) {
        self.state.write().await.stock.insert(product_id, quantity);
    }

    /// Returns the available stock for a product.
    pub async fn stock_of(&self, product_id: ProductId) -> u32 {
        self.state
            .read()
            .await
            .stock
            .get(&product_id)
            .copied()
            .unwrap_or(0)
    }

    /// Simulates the inventory service being unreachable.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.write().await.unreachable = unreachable;
    }
}

#[async_trait]
impl InventoryPort for InMemoryInventory {
    async fn reserve(&self, product_id: ProductId, quantity: u32) -> bool {
        let mut state = self.state.write().await;
        if state.unreachable {
            tracing::warn!(%product_id, quantity, "inventory unreachable, reservation fallback");
            return false;
        }

        match state.stock.get_mut(&product_id) {
            Some(available) if *available >= quantity => {
                *available -= quantity;
                true
            }
            _ => false,
        }
    }

    async fn release(&self, product_id: ProductId, quantity: u32) {
        let mut state = self.state.write().await;
        if state.unreachable {
            tracing::warn!(%product_id, quantity, "inventory unreachable, dropping release");
            return;
        }
        *state.stock.entry(product_id).or_insert(0) += quantity;
    }
}
