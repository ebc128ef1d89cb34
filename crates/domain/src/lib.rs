//! Domain layer for the fulfillment system.
//!
//! This crate provides:
//! - The [`Order`] entity with its lifecycle and payment-status state machines
//! - The [`Payment`] entity with the gateway-driven payment state machine
//! - Integration event schemas published on the bus ([`OrderCreated`],
//!   [`PaymentCompleted`], [`PaymentFailed`], [`OrderStatusChanged`])

pub mod error;
pub mod events;
pub mod order;
pub mod payment;

pub use error::DomainError;
pub use events::{
    IntegrationEvent, OrderCreated, OrderItemPayload, OrderStatusChanged, PaymentCompleted,
    PaymentFailed, PublishEventExt,
};
pub use order::{Order, OrderLine, OrderStatus, next_order_number};
pub use payment::{Payment, PaymentMethod, PaymentStatus, next_payment_ref};
