//! Store error types.

use domain::DomainError;
use thiserror::Error;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A mutation was rejected by the entity's state machine.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The backing store is unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
