//! Payment repository trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{DomainError, Payment};
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};

/// Repository for payment records.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persists a new payment, assigning its surrogate ID.
    async fn insert(&self, payment: Payment) -> Result<Payment>;

    /// Loads a payment by surrogate ID.
    async fn get(&self, id: i64) -> Result<Option<Payment>>;

    /// Loads a payment by its external reference.
    async fn get_by_ref(&self, payment_ref: &str) -> Result<Option<Payment>>;

    /// Returns all payments for an order, oldest first.
    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;

    /// Returns all payments of a user, oldest first.
    async fn for_user(&self, user_id: UserId) -> Result<Vec<Payment>>;

    /// Atomically mutates a payment under the store's lock.
    ///
    /// The stored payment is replaced only if the mutation succeeds. Returns
    /// the updated payment.
    async fn update<F>(&self, id: i64, mutate: F) -> Result<Payment>
    where
        F: FnOnce(&mut Payment) -> std::result::Result<(), DomainError> + Send;
}

#[derive(Default)]
struct PaymentStoreState {
    payments: HashMap<i64, Payment>,
    next_id: i64,
    fail_on_insert: bool,
}

/// In-memory payment repository.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<PaymentStoreState>>,
}

impl InMemoryPaymentStore {
    /// Creates a new empty payment store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to reject inserts, simulating an outage.
    pub async fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().await.fail_on_insert = fail;
    }

    /// Returns the number of stored payments.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, mut payment: Payment) -> Result<Payment> {
        let mut state = self.state.write().await;
        if state.fail_on_insert {
            return Err(StoreError::Unavailable("payment store down".to_string()));
        }

        state.next_id += 1;
        let id = state.next_id;
        payment.assign_id(id);
        state.payments.insert(id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: i64) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn get_by_ref(&self, payment_ref: &str) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| p.payment_ref() == payment_ref)
            .cloned())
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.order_id() == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(Payment::id);
        Ok(payments)
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.user_id() == user_id)
            .cloned()
            .collect();
        payments.sort_by_key(Payment::id);
        Ok(payments)
    }

    async fn update<F>(&self, id: i64, mutate: F) -> Result<Payment>
    where
        F: FnOnce(&mut Payment) -> std::result::Result<(), DomainError> + Send,
    {
        let mut state = self.state.write().await;
        let current = state.payments.get(&id).ok_or_else(|| StoreError::NotFound {
            kind: "Payment",
            id: id.to_string(),
        })?;

        let mut updated = current.clone();
        mutate(&mut updated)?;
        state.payments.insert(id, updated.clone());
        Ok(updated)
    }
}
