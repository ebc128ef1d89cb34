//! Order fulfillment saga.
//!
//! Coordinates order creation across the inventory, order, and payment
//! services without a shared database, using forward steps and compensations
//! instead of a distributed transaction:
//!
//! 1. The [`OrderOrchestrator`] reserves stock line by line, persists the
//!    order, and publishes `OrderCreated`, rolling every reservation back
//!    if any step fails.
//! 2. The [`PaymentProcessor`] consumes `OrderCreated`, records a payment,
//!    and charges the (simulated) gateway on a worker task, publishing
//!    `PaymentCompleted` or `PaymentFailed`.
//! 3. The [`OrderReconciler`] consumes the payment outcome and confirms or
//!    cancels the order, releasing reserved stock on cancellation.
//!
//! Event delivery is at-least-once; every consumer here tolerates duplicate
//! delivery, and stock release is guarded so it happens logically once.

pub mod cart;
pub mod error;
pub mod gateway;
pub mod inventory;
pub mod notifier;
pub mod orchestrator;
pub mod payments;
pub mod reconciler;

pub use cart::{CartLine, CartPort, InMemoryCart};
pub use error::FulfillmentError;
pub use gateway::{
    DecisionSource, FixedDecision, GatewayCharge, GatewayConfig, GatewayError, GatewayRefund,
    PaymentGateway, RandomDecision, SimulatedGateway,
};
pub use inventory::{InMemoryInventory, InventoryPort};
pub use notifier::{LoggingNotifier, NotificationDispatcher, NotificationPort};
pub use orchestrator::OrderOrchestrator;
pub use payments::{PaymentProcessor, PaymentWorker, RefundOutcome};
pub use reconciler::OrderReconciler;
