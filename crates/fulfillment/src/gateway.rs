//! Simulated payment gateway.
//!
//! In production this seam would front a real gateway (Stripe, PayPal, …).
//! The simulation sleeps a configured delay, then approves with a configured
//! probability. The approve/decline decision is injected through
//! [`DecisionSource`] so tests control outcomes deterministically.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use domain::PaymentMethod;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use uuid::Uuid;

/// Gateway response code for an approved operation.
pub const APPROVED_CODE: &str = "00";
/// Gateway response code for a declined operation.
pub const DECLINED_CODE: &str = "05";

/// Refunds succeed more often than charges in the simulation.
const REFUND_SUCCESS_RATE: f64 = 0.98;

/// Errors returned by the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway rejected the operation.
    #[error("{message} (code {code})")]
    Declined {
        message: String,
        code: &'static str,
    },
}

/// A successful charge.
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    /// Transaction ID assigned by the gateway.
    pub transaction_id: String,
    /// Raw gateway response code.
    pub response_code: &'static str,
}

/// A successful refund.
#[derive(Debug, Clone)]
pub struct GatewayRefund {
    /// Refund ID assigned by the gateway.
    pub refund_id: String,
}

/// The payment gateway seam.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Attempts to charge the given amount.
    async fn charge(
        &self,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<GatewayCharge, GatewayError>;

    /// Attempts to refund a previous charge.
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Money,
    ) -> Result<GatewayRefund, GatewayError>;
}

/// Source of approve/decline decisions for the simulated gateway.
pub trait DecisionSource: Send + Sync {
    /// Decides whether the next charge is approved.
    fn approve_charge(&self) -> bool;

    /// Decides whether the next refund is approved.
    fn approve_refund(&self) -> bool;
}

/// Probability-based decisions from a seedable RNG.
#[derive(Debug)]
pub struct RandomDecision {
    charge_success_rate: f64,
    refund_success_rate: f64,
    rng: Mutex<StdRng>,
}

impl RandomDecision {
    /// Creates a decision source with the given charge success rate.
    pub fn new(charge_success_rate: f64) -> Self {
        Self {
            charge_success_rate,
            refund_success_rate: REFUND_SUCCESS_RATE,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Creates a reproducible decision source for tests.
    pub fn seeded(charge_success_rate: f64, seed: u64) -> Self {
        Self {
            charge_success_rate,
            refund_success_rate: REFUND_SUCCESS_RATE,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl DecisionSource for RandomDecision {
    fn approve_charge(&self) -> bool {
        self.rng.lock().unwrap().random::<f64>() < self.charge_success_rate
    }

    fn approve_refund(&self) -> bool {
        self.rng.lock().unwrap().random::<f64>() < self.refund_success_rate
    }
}

/// A fixed decision, for tests that need one specific outcome.
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub bool);

impl DecisionSource for FixedDecision {
    fn approve_charge(&self) -> bool {
        self.0
    }

    fn approve_refund(&self) -> bool {
        self.0
    }
}

/// Gateway simulation settings loaded from the environment.
///
/// Reads:
/// - `PAYMENT_GATEWAY_DELAY_MS`: simulated network latency (default `2000`)
/// - `PAYMENT_GATEWAY_SUCCESS_RATE`: charge approval probability (default `0.95`)
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub delay: Duration,
    pub success_rate: f64,
}

impl GatewayConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let delay_ms = std::env::var("PAYMENT_GATEWAY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);
        let success_rate = std::env::var("PAYMENT_GATEWAY_SUCCESS_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.95);
        Self {
            delay: Duration::from_millis(delay_ms),
            success_rate,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            success_rate: 0.95,
        }
    }
}

/// Simulated payment gateway.
pub struct SimulatedGateway<D: DecisionSource> {
    delay: Duration,
    decision: D,
}

impl<D: DecisionSource> SimulatedGateway<D> {
    /// Creates a gateway with the given latency and decision source.
    pub fn new(delay: Duration, decision: D) -> Self {
        Self { delay, decision }
    }
}

impl SimulatedGateway<RandomDecision> {
    /// Creates a gateway from environment-driven configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.delay, RandomDecision::new(config.success_rate))
    }
}

#[async_trait]
impl<D: DecisionSource> PaymentGateway for SimulatedGateway<D> {
    async fn charge(
        &self,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<GatewayCharge, GatewayError> {
        tracing::info!(%amount, %method, "processing payment");
        tokio::time::sleep(self.delay).await;

        if self.decision.approve_charge() {
            let transaction_id = format!("TXN-{}", Uuid::new_v4());
            tracing::info!(%transaction_id, "payment approved");
            Ok(GatewayCharge {
                transaction_id,
                response_code: APPROVED_CODE,
            })
        } else {
            tracing::warn!(%amount, "payment declined");
            Err(GatewayError::Declined {
                message: "Payment declined by gateway".to_string(),
                code: DECLINED_CODE,
            })
        }
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Money,
    ) -> Result<GatewayRefund, GatewayError> {
        tracing::info!(transaction_id, %amount, "processing refund");
        tokio::time::sleep(self.delay).await;

        if self.decision.approve_refund() {
            let refund_id = format!("REFUND-{}", Uuid::new_v4());
            tracing::info!(%refund_id, "refund approved");
            Ok(GatewayRefund { refund_id })
        } else {
            tracing::warn!(transaction_id, "refund declined");
            Err(GatewayError::Declined {
                message: "Refund declined by gateway".to_string(),
                code: DECLINED_CODE,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_gateway(approve: bool) -> SimulatedGateway<FixedDecision> {
        SimulatedGateway::new(Duration::ZERO, FixedDecision(approve))
    }

    #[tokio::test]
    async fn test_approved_charge_returns_transaction_id() {
        let gateway = instant_gateway(true);
        let charge = gateway
            .charge(Money::from_cents(2000), PaymentMethod::CreditCard)
            .await
            .unwrap();

        assert!(charge.transaction_id.starts_with("TXN-"));
        assert_eq!(charge.response_code, APPROVED_CODE);
    }

    #[tokio::test]
    async fn test_declined_charge_carries_message() {
        let gateway = instant_gateway(false);
        let result = gateway
            .charge(Money::from_cents(2000), PaymentMethod::CreditCard)
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("declined"));
        assert!(err.to_string().contains(DECLINED_CODE));
    }

    #[tokio::test]
    async fn test_refund_outcomes() {
        let gateway = instant_gateway(true);
        let refund = gateway
            .refund("TXN-abc", Money::from_cents(2000))
            .await
            .unwrap();
        assert!(refund.refund_id.starts_with("REFUND-"));

        let gateway = instant_gateway(false);
        assert!(gateway.refund("TXN-abc", Money::from_cents(2000)).await.is_err());
    }

    #[tokio::test]
    async fn test_seeded_decisions_are_reproducible() {
        let first = RandomDecision::seeded(0.5, 42);
        let second = RandomDecision::seeded(0.5, 42);

        let a: Vec<bool> = (0..16).map(|_| first.approve_charge()).collect();
        let b: Vec<bool> = (0..16).map(|_| second.approve_charge()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_extreme_rates() {
        let always = RandomDecision::seeded(1.1, 1);
        assert!((0..32).all(|_| always.approve_charge()));

        let never = RandomDecision::seeded(0.0, 1);
        assert!((0..32).all(|_| !never.approve_charge()));
    }

    #[test]
    fn test_config_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.delay, Duration::from_millis(2000));
        assert!((config.success_rate - 0.95).abs() < f64::EPSILON);
    }
}
