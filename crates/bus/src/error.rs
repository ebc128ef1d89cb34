//! Bus error types.

use thiserror::Error;

/// Errors that can occur on the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Publish targeted an exchange the topology does not declare.
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    /// Handler registration targeted a queue the topology does not declare.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Payload could not be serialized or decoded.
    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A consumer failed to process a delivery.
    #[error("Handler failed: {0}")]
    Handler(String),
}

/// Convenience type alias for bus results.
pub type Result<T> = std::result::Result<T, BusError>;
