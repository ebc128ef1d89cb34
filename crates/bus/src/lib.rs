//! Event bus abstraction for the fulfillment system.
//!
//! This crate provides the messaging layer the saga rides on:
//! - [`Topology`] describes exchanges, queues, bindings, and dead-letter
//!   routes as one explicit descriptor built at startup
//! - [`EventPublisher`] is the publish seam injected into producers
//! - [`MessageHandler`] is implemented by consumers bound to a queue
//! - [`InMemoryBroker`] delivers at-least-once with redelivery and
//!   dead-lettering, standing in for an external AMQP broker
//!
//! Delivery is at-least-once: handlers must tolerate duplicates, and a
//! message whose handler keeps failing is diverted to the queue's
//! dead-letter store rather than dropped.

pub mod broker;
pub mod envelope;
pub mod error;
pub mod topology;

pub use broker::{EventPublisher, EventPublisherExt, InMemoryBroker, MessageHandler};
pub use envelope::{MessageEnvelope, MessageId};
pub use error::{BusError, Result};
pub use topology::{QueueSpec, Topology};
