//! Domain error types.

use common::ProductId;
use thiserror::Error;

/// Errors that can occur during entity operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Entity is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidStateTransition {
        current: &'static str,
        action: &'static str,
    },

    /// An order must have at least one line.
    #[error("Order has no lines")]
    EmptyOrder,

    /// Line quantity must be greater than zero.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Line unit price must be greater than zero.
    #[error("Invalid unit price {price} for product {product_id}")]
    InvalidPrice { product_id: ProductId, price: i64 },
}
