//! Persistence layer for the fulfillment system.
//!
//! Repositories expose atomic load-mutate-save through their `update`
//! methods: the mutation closure runs under the store's write lock against
//! a copy of the entity, and the copy replaces the stored entity only when
//! the mutation succeeds. This is the transaction boundary the saga's
//! idempotent status transitions rely on.

pub mod error;
pub mod orders;
pub mod payments;

pub use error::{Result, StoreError};
pub use orders::{InMemoryOrderStore, OrderStore};
pub use payments::{InMemoryPaymentStore, PaymentStore};
