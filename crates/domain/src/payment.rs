//! Payment entity and state machine.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// The state of a payment in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──┬──► Completed ──► Refunded
///     │            │       │
///     └────────────┴───────└──► Failed
/// ```
///
/// The same enum records the payment status on the order side, where only
/// `Pending`, `Completed`, and `Failed` occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    /// Payment record created, not yet sent to the gateway.
    #[default]
    Pending,

    /// Gateway call in flight.
    Processing,

    /// Gateway accepted the charge.
    Completed,

    /// Gateway declined the charge or processing errored (terminal state).
    Failed,

    /// A completed payment was refunded (terminal state).
    Refunded,
}

impl PaymentStatus {
    /// Returns true if gateway processing can start in this state.
    pub fn can_process(&self) -> bool {
        matches!(self, PaymentStatus::Pending)
    }

    /// Returns true if the payment can settle (complete or fail) in this state.
    ///
    /// Failure is also reachable straight from `Pending` when processing
    /// errors before the gateway call.
    pub fn can_fail(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Returns true if the payment can complete in this state.
    pub fn can_complete(&self) -> bool {
        matches!(self, PaymentStatus::Processing)
    }

    /// Returns true if the payment can be refunded in this state.
    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Completed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Refunded)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Processing => "Processing",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Refunded => "Refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment method selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentMethod {
    /// Charge a credit card.
    #[default]
    CreditCard,

    /// Charge a debit card.
    DebitCard,

    /// Charge a PayPal account.
    Paypal,
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PaymentMethod::CreditCard => "CreditCard",
            PaymentMethod::DebitCard => "DebitCard",
            PaymentMethod::Paypal => "Paypal",
        };
        write!(f, "{name}")
    }
}

/// Generates an external payment reference of the form
/// `PAY-<epoch-ms>-<8-char-random>`, e.g. `PAY-1741944930123-9F4C21AB`.
pub fn next_payment_ref() -> String {
    let millis = Utc::now().timestamp_millis();
    let uuid = Uuid::new_v4().simple().to_string();
    format!("PAY-{millis}-{}", uuid[..8].to_uppercase())
}

/// Payment entity.
///
/// Created by the payment processor in response to an order-created event;
/// the processor owns all subsequent mutation. At most one non-terminal
/// payment exists per order. The surrogate ID is assigned by the repository
/// on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    id: Option<i64>,
    payment_ref: String,
    order_id: OrderId,
    user_id: UserId,
    amount: Money,
    method: PaymentMethod,
    status: PaymentStatus,
    transaction_id: Option<String>,
    gateway_response: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a new `Pending` payment for an order.
    pub fn create(order_id: OrderId, user_id: UserId, amount: Money, method: PaymentMethod) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            payment_ref: next_payment_ref(),
            order_id,
            user_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            transaction_id: None,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Assigns the surrogate ID. Called by the repository on insert.
    pub fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    /// Returns the surrogate ID, if the payment has been persisted.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Returns the external payment reference.
    pub fn payment_ref(&self) -> &str {
        &self.payment_ref
    }

    /// Returns the order this payment settles.
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Returns the paying user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the charged amount.
    pub fn amount(&self) -> Money {
        self.amount
    }

    /// Returns the payment method.
    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    /// Returns the current status.
    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    /// Returns the gateway transaction ID, set on success.
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    /// Returns the raw gateway response text, if recorded.
    pub fn gateway_response(&self) -> Option<&str> {
        self.gateway_response.as_deref()
    }

    /// Returns when the payment was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the payment was last updated.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Moves the payment to `Processing` before the gateway call.
    pub fn begin_processing(&mut self) -> Result<(), DomainError> {
        if !self.status.can_process() {
            return Err(DomainError::InvalidStateTransition {
                current: self.status.as_str(),
                action: "process",
            });
        }
        self.status = PaymentStatus::Processing;
        self.touch();
        Ok(())
    }

    /// Records a successful gateway charge.
    pub fn complete(
        &mut self,
        transaction_id: impl Into<String>,
        gateway_response: impl Into<String>,
    ) -> Result<(), DomainError> {
        if !self.status.can_complete() {
            return Err(DomainError::InvalidStateTransition {
                current: self.status.as_str(),
                action: "complete",
            });
        }
        self.status = PaymentStatus::Completed;
        self.transaction_id = Some(transaction_id.into());
        self.gateway_response = Some(gateway_response.into());
        self.touch();
        Ok(())
    }

    /// Records a declined charge or processing error.
    pub fn fail(&mut self, gateway_response: impl Into<String>) -> Result<(), DomainError> {
        if !self.status.can_fail() {
            return Err(DomainError::InvalidStateTransition {
                current: self.status.as_str(),
                action: "fail",
            });
        }
        self.status = PaymentStatus::Failed;
        self.gateway_response = Some(gateway_response.into());
        self.touch();
        Ok(())
    }

    /// Records a successful refund of a completed payment.
    pub fn refund(&mut self) -> Result<(), DomainError> {
        if !self.status.can_refund() {
            return Err(DomainError::InvalidStateTransition {
                current: self.status.as_str(),
                action: "refund",
            });
        }
        self.status = PaymentStatus::Refunded;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_payment() -> Payment {
        Payment::create(
            OrderId::new(1),
            UserId::new(2),
            Money::from_cents(2000),
            PaymentMethod::CreditCard,
        )
    }

    #[test]
    fn test_payment_ref_shape() {
        let payment_ref = next_payment_ref();
        let parts: Vec<&str> = payment_ref.split('-').collect();
        assert_eq!(parts[0], "PAY");
        assert_eq!(parts.len(), 3);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[2], parts[2].to_uppercase());
    }

    #[test]
    fn test_create_payment() {
        let payment = pending_payment();
        assert!(payment.id().is_none());
        assert!(payment.payment_ref().starts_with("PAY-"));
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert!(payment.transaction_id().is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut payment = pending_payment();
        payment.begin_processing().unwrap();
        assert_eq!(payment.status(), PaymentStatus::Processing);

        payment.complete("TXN-abc", "approved").unwrap();
        assert_eq!(payment.status(), PaymentStatus::Completed);
        assert_eq!(payment.transaction_id(), Some("TXN-abc"));
        assert_eq!(payment.gateway_response(), Some("approved"));
    }

    #[test]
    fn test_fail_from_processing() {
        let mut payment = pending_payment();
        payment.begin_processing().unwrap();
        payment.fail("declined by gateway").unwrap();

        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert_eq!(payment.gateway_response(), Some("declined by gateway"));
        assert!(payment.status().is_terminal());
    }

    #[test]
    fn test_fail_straight_from_pending() {
        let mut payment = pending_payment();
        payment.fail("worker crashed").unwrap();
        assert_eq!(payment.status(), PaymentStatus::Failed);
    }

    #[test]
    fn test_complete_requires_processing() {
        let mut payment = pending_payment();
        let result = payment.complete("TXN-abc", "approved");
        assert!(matches!(
            result,
            Err(DomainError::InvalidStateTransition { action: "complete", .. })
        ));
    }

    #[test]
    fn test_refund_only_from_completed() {
        let mut payment = pending_payment();
        assert!(payment.refund().is_err());

        payment.begin_processing().unwrap();
        assert!(payment.refund().is_err());

        payment.complete("TXN-abc", "approved").unwrap();
        payment.refund().unwrap();
        assert_eq!(payment.status(), PaymentStatus::Refunded);
        assert!(payment.status().is_terminal());

        // Terminal: no second refund, no failing.
        assert!(payment.refund().is_err());
        assert!(payment.fail("late").is_err());
    }

    #[test]
    fn test_process_twice_fails() {
        let mut payment = pending_payment();
        payment.begin_processing().unwrap();
        assert!(payment.begin_processing().is_err());
    }

    #[test]
    fn test_serialization() {
        let mut payment = pending_payment();
        payment.assign_id(5);

        let json = serde_json::to_string(&payment).unwrap();
        let back: Payment = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id(), Some(5));
        assert_eq!(back.payment_ref(), payment.payment_ref());
        assert_eq!(back.status(), PaymentStatus::Pending);
    }
}
