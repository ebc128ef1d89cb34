//! Fulfillment error taxonomy.

use bus::BusError;
use domain::DomainError;
use store::StoreError;
use thiserror::Error;

/// Errors surfaced by the fulfillment saga.
///
/// Synchronous order-creation failures reach the caller only after
/// compensation has run; asynchronous payment failures are converted into
/// `PaymentFailed` events instead of being raised.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// A cart line could not be reserved; the order was not created.
    #[error("Product out of stock: {product_name}")]
    OutOfStock { product_name: String },

    /// The referenced order or payment does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The request is not valid in the entity's current state.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The payment gateway rejected the operation.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// A downstream dependency (store, broker) is unavailable.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<DomainError> for FulfillmentError {
    fn from(e: DomainError) -> Self {
        FulfillmentError::InvalidRequest(e.to_string())
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => FulfillmentError::NotFound { kind, id },
            StoreError::Domain(domain) => FulfillmentError::InvalidRequest(domain.to_string()),
            StoreError::Unavailable(reason) => FulfillmentError::Infrastructure(reason),
        }
    }
}

impl From<BusError> for FulfillmentError {
    fn from(e: BusError) -> Self {
        FulfillmentError::Infrastructure(e.to_string())
    }
}

impl From<FulfillmentError> for BusError {
    fn from(e: FulfillmentError) -> Self {
        BusError::Handler(e.to_string())
    }
}
