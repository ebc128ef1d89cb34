//! Order entity implementation.

use chrono::{DateTime, Utc};
use common::{AddressId, Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::payment::PaymentStatus;

use super::{OrderStatus, next_order_number};

/// A line of an order.
///
/// The product name and unit price are captured at ordering time so the
/// order is immune to later catalog changes. The subtotal is always
/// computed, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// The product ordered.
    pub product_id: ProductId,

    /// Product name captured at ordering time.
    pub product_name: String,

    /// Quantity ordered.
    pub quantity: u32,

    /// Price per unit captured at ordering time.
    pub unit_price: Money,
}

impl OrderLine {
    /// Creates a new order line.
    pub fn new(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the line subtotal (`unit_price * quantity`).
    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Order entity.
///
/// Owned by the order orchestrator and reconciler; lines have no lifecycle
/// of their own. The surrogate ID is assigned by the repository on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: Option<OrderId>,
    order_number: String,
    user_id: UserId,
    shipping_address_id: AddressId,
    lines: Vec<OrderLine>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_ref: Option<String>,
    /// Set once reserved stock has been handed back, so compensation under
    /// at-least-once delivery releases logically once.
    stock_released: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Places a new order from the given cart lines.
    ///
    /// The order starts `Pending` with payment status `Pending`. Lines must
    /// be non-empty with positive quantities and prices.
    pub fn place(
        user_id: UserId,
        shipping_address_id: AddressId,
        lines: Vec<OrderLine>,
    ) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::EmptyOrder);
        }
        for line in &lines {
            if line.quantity == 0 {
                return Err(DomainError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: line.quantity,
                });
            }
            if !line.unit_price.is_positive() {
                return Err(DomainError::InvalidPrice {
                    product_id: line.product_id,
                    price: line.unit_price.cents(),
                });
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: None,
            order_number: next_order_number(),
            user_id,
            shipping_address_id,
            lines,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_ref: None,
            stock_released: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Assigns the surrogate ID. Called by the repository on insert.
    pub fn assign_id(&mut self, id: OrderId) {
        self.id = Some(id);
    }
}

// Query methods
impl Order {
    /// Returns the surrogate ID, if the order has been persisted.
    pub fn id(&self) -> Option<OrderId> {
        self.id
    }

    /// Returns the human-readable order number.
    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    /// Returns the owning user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the shipping address reference.
    pub fn shipping_address_id(&self) -> AddressId {
        self.shipping_address_id
    }

    /// Returns the order lines.
    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    /// Returns the current lifecycle status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the payment status recorded on the order.
    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    /// Returns the associated payment reference, once a payment exists.
    pub fn payment_ref(&self) -> Option<&str> {
        self.payment_ref.as_deref()
    }

    /// Returns true if reserved stock has already been handed back.
    pub fn stock_released(&self) -> bool {
        self.stock_released
    }

    /// Returns the order total, recomputed from the lines on every call.
    pub fn total_amount(&self) -> Money {
        self.lines.iter().map(OrderLine::subtotal).sum()
    }

    /// Returns when the order was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the order was last updated.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// State transitions
impl Order {
    /// Records a completed payment and confirms the order.
    ///
    /// Idempotent: re-applying the same outcome is a no-op. A cancellation
    /// that won the race stands: the payment outcome is recorded but the
    /// order is not resurrected.
    pub fn apply_payment_completed(&mut self, payment_ref: &str) {
        self.payment_ref = Some(payment_ref.to_string());
        self.payment_status = PaymentStatus::Completed;
        if self.status.can_confirm() {
            self.status = OrderStatus::Confirmed;
        }
        self.touch();
    }

    /// Records a failed payment and cancels the order.
    ///
    /// Returns true if the caller must release reserved stock, at most once
    /// per order, across duplicate deliveries and user-cancellation races.
    pub fn apply_payment_failed(&mut self, payment_ref: Option<&str>) -> bool {
        if self.payment_status == PaymentStatus::Completed {
            // Conflicting outcome for an already settled payment; ignore.
            return false;
        }
        if let Some(payment_ref) = payment_ref {
            self.payment_ref = Some(payment_ref.to_string());
        }
        self.payment_status = PaymentStatus::Failed;
        if !self.status.is_terminal() {
            self.status = OrderStatus::Cancelled;
        }
        self.touch();

        if self.status == OrderStatus::Cancelled {
            self.take_stock_release()
        } else {
            false
        }
    }

    /// Cancels the order on the user's behalf.
    ///
    /// Permitted only while `Pending` or `Confirmed`. Returns true if the
    /// caller must release reserved stock.
    pub fn cancel(&mut self) -> Result<bool, DomainError> {
        if !self.status.can_cancel() {
            return Err(DomainError::InvalidStateTransition {
                current: self.status.as_str(),
                action: "cancel",
            });
        }
        self.status = OrderStatus::Cancelled;
        self.touch();
        Ok(self.take_stock_release())
    }

    /// Marks the order as handed to the carrier.
    pub fn ship(&mut self) -> Result<(), DomainError> {
        if !self.status.can_ship() {
            return Err(DomainError::InvalidStateTransition {
                current: self.status.as_str(),
                action: "ship",
            });
        }
        self.status = OrderStatus::Shipped;
        self.touch();
        Ok(())
    }

    /// Marks the order as delivered.
    pub fn deliver(&mut self) -> Result<(), DomainError> {
        if !self.status.can_deliver() {
            return Err(DomainError::InvalidStateTransition {
                current: self.status.as_str(),
                action: "deliver",
            });
        }
        self.status = OrderStatus::Delivered;
        self.touch();
        Ok(())
    }

    fn take_stock_release(&mut self) -> bool {
        if self.stock_released {
            false
        } else {
            self.stock_released = true;
            true
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
