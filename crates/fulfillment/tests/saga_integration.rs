//! End-to-end tests for the order fulfillment saga.
//!
//! Wires the orchestrator, payment processor, and reconciler together over
//! the in-memory broker and drives deliveries deterministically: the broker
//! drains inline and the payment worker runs until its queue is empty.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bus::{EventPublisher, EventPublisherExt, InMemoryBroker, Topology, topology};
use common::{AddressId, Money, OrderId, ProductId, UserId};
use domain::{OrderStatus, PaymentFailed, PaymentStatus};
use fulfillment::{
    CartLine, CartPort, DecisionSource, FulfillmentError, InMemoryCart, InMemoryInventory, LoggingNotifier,
    NotificationDispatcher, OrderOrchestrator, OrderReconciler, PaymentProcessor, PaymentWorker,
    SimulatedGateway,
};
use store::{InMemoryOrderStore, InMemoryPaymentStore, OrderStore, PaymentStore};

/// Gateway decision the test can flip between orders.
#[derive(Clone)]
struct SwitchableDecision(Arc<AtomicBool>);

impl DecisionSource for SwitchableDecision {
    fn approve_charge(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn approve_refund(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type TestOrchestrator =
    OrderOrchestrator<InMemoryCart, InMemoryInventory, InMemoryOrderStore, InMemoryBroker>;
type TestProcessor =
    PaymentProcessor<InMemoryPaymentStore, SimulatedGateway<SwitchableDecision>, InMemoryBroker>;
type TestWorker =
    PaymentWorker<InMemoryPaymentStore, SimulatedGateway<SwitchableDecision>, InMemoryBroker>;

struct TestHarness {
    orchestrator: TestOrchestrator,
    processor: Arc<TestProcessor>,
    worker: TestWorker,
    cart: InMemoryCart,
    inventory: InMemoryInventory,
    orders: InMemoryOrderStore,
    payments: InMemoryPaymentStore,
    broker: InMemoryBroker,
    gateway_approves: Arc<AtomicBool>,
}

impl TestHarness {
    async fn new() -> Self {
        let cart = InMemoryCart::new();
        let inventory = InMemoryInventory::new();
        let orders = InMemoryOrderStore::new();
        let payments = InMemoryPaymentStore::new();
        let broker = InMemoryBroker::new(Topology::fulfillment());

        let gateway_approves = Arc::new(AtomicBool::new(true));
        let gateway = SimulatedGateway::new(
            Duration::ZERO,
            SwitchableDecision(gateway_approves.clone()),
        );

        let orchestrator = OrderOrchestrator::new(
            cart.clone(),
            inventory.clone(),
            orders.clone(),
            broker.clone(),
        );
        let (processor, worker) =
            PaymentProcessor::new(payments.clone(), gateway, broker.clone());
        let processor = Arc::new(processor);
        let reconciler = Arc::new(OrderReconciler::new(
            orders.clone(),
            inventory.clone(),
            broker.clone(),
        ));

        broker
            .register_handler(topology::ORDER_CREATED_QUEUE, processor.clone())
            .await
            .unwrap();
        broker
            .register_handler(topology::PAYMENT_COMPLETED_QUEUE, reconciler.clone())
            .await
            .unwrap();
        broker
            .register_handler(topology::PAYMENT_FAILED_QUEUE, reconciler)
            .await
            .unwrap();
        broker
            .register_handler(
                topology::ORDER_STATUS_CHANGED_QUEUE,
                Arc::new(NotificationDispatcher::new(LoggingNotifier)),
            )
            .await
            .unwrap();

        Self {
            orchestrator,
            processor,
            worker,
            cart,
            inventory,
            orders,
            payments,
            broker,
            gateway_approves,
        }
    }

    fn set_gateway_approves(&self, approve: bool) {
        self.gateway_approves.store(approve, Ordering::SeqCst);
    }

    /// Drains broker deliveries and the payment worker until both are idle.
    async fn settle(&self) {
        loop {
            let delivered = self.broker.run_pending().await;
            let processed = self.worker.run_until_idle().await;
            if delivered == 0 && processed == 0 {
                return;
            }
        }
    }

    /// Stocks product 1 with 5 units and fills the cart with 2 of them.
    async fn stock_and_fill_cart(&self) -> UserId {
        let user = UserId::new(1);
        self.inventory.set_stock(ProductId::new(1), 5).await;
        self.cart
            .set_lines(
                user,
                vec![CartLine::new(ProductId::new(1), "Widget", 2, Money::from_cents(1000))],
            )
            .await;
        user
    }

    async fn order(&self, order_id: OrderId) -> domain::Order {
        self.orders.get(order_id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_happy_path_confirms_order_and_completes_payment() {
    let h = TestHarness::new().await;
    let user = h.stock_and_fill_cart().await;

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    let order_id = order.id().unwrap();

    // Synchronous half done: order pending, stock committed, cart cleared.
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.total_amount().cents(), 2000);
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 3);
    assert!(h.cart.lines(user).await.unwrap().is_empty());

    h.settle().await;

    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Confirmed);
    assert_eq!(order.payment_status(), PaymentStatus::Completed);
    assert!(order.payment_ref().unwrap().starts_with("PAY-"));

    let payments = h.payments.for_order(order_id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status(), PaymentStatus::Completed);
    assert_eq!(payments[0].amount().cents(), 2000);
    assert!(payments[0].transaction_id().unwrap().starts_with("TXN-"));

    // Stock stays committed.
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 3);
}

#[tokio::test]
async fn test_out_of_stock_line_leaves_no_trace() {
    let h = TestHarness::new().await;
    let user = UserId::new(1);
    h.inventory.set_stock(ProductId::new(1), 5).await;
    h.inventory.set_stock(ProductId::new(2), 0).await;
    h.cart
        .set_lines(
            user,
            vec![
                CartLine::new(ProductId::new(1), "Widget", 2, Money::from_cents(1000)),
                CartLine::new(ProductId::new(2), "Gadget", 1, Money::from_cents(500)),
            ],
        )
        .await;

    let result = h.orchestrator.create_order(user, AddressId::new(10)).await;

    match result {
        Err(FulfillmentError::OutOfStock { product_name }) => assert_eq!(product_name, "Gadget"),
        other => panic!("expected OutOfStock, got {other:?}"),
    }

    h.settle().await;

    // No partial reservation survives, nothing was persisted or published.
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 5);
    assert_eq!(h.orders.order_count().await, 0);
    assert_eq!(h.payments.payment_count().await, 0);
}

#[tokio::test]
async fn test_gateway_decline_cancels_order_and_restocks() {
    let h = TestHarness::new().await;
    let user = h.stock_and_fill_cart().await;
    h.set_gateway_approves(false);

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    let order_id = order.id().unwrap();
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 3);

    h.settle().await;

    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(order.payment_status(), PaymentStatus::Failed);

    let payments = h.payments.for_order(order_id).await.unwrap();
    assert_eq!(payments[0].status(), PaymentStatus::Failed);
    assert!(payments[0].gateway_response().unwrap().contains("declined"));

    // Compensation returned the 2 reserved units.
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 5);
}

#[tokio::test]
async fn test_duplicate_payment_failed_delivery_releases_once() {
    let h = TestHarness::new().await;
    let user = h.stock_and_fill_cart().await;
    h.set_gateway_approves(false);

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    let order_id = order.id().unwrap();
    h.settle().await;
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 5);

    // At-least-once: the same outcome event arrives again.
    let payments = h.payments.for_order(order_id).await.unwrap();
    let duplicate = PaymentFailed::now(
        Some(payments[0].payment_ref().to_string()),
        order_id,
        "Payment declined by gateway",
    );
    h.broker
        .publish_json(
            topology::PAYMENT_EXCHANGE,
            topology::PAYMENT_FAILED_KEY,
            &duplicate,
        )
        .await
        .unwrap();
    h.settle().await;

    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Cancelled);
    // Stock is not over-credited.
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 5);
}

#[tokio::test]
async fn test_duplicate_payment_completed_delivery_is_idempotent() {
    let h = TestHarness::new().await;
    let user = h.stock_and_fill_cart().await;

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    let order_id = order.id().unwrap();
    h.settle().await;

    let confirmed = h.order(order_id).await;
    assert_eq!(confirmed.status(), OrderStatus::Confirmed);

    let payments = h.payments.for_order(order_id).await.unwrap();
    let duplicate = domain::PaymentCompleted {
        payment_id: payments[0].payment_ref().to_string(),
        order_id,
        user_id: user,
        amount: payments[0].amount(),
        transaction_id: payments[0].transaction_id().unwrap().to_string(),
        completed_at: payments[0].updated_at(),
    };
    h.broker
        .publish_json(
            topology::PAYMENT_EXCHANGE,
            topology::PAYMENT_COMPLETED_KEY,
            &duplicate,
        )
        .await
        .unwrap();
    h.settle().await;

    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Confirmed);
    assert_eq!(order.payment_status(), PaymentStatus::Completed);
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 3);
}

#[tokio::test]
async fn test_user_cancellation_races_payment_failure() {
    let h = TestHarness::new().await;
    let user = h.stock_and_fill_cart().await;
    h.set_gateway_approves(false);

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    let order_id = order.id().unwrap();

    // The user cancels before the payment outcome is processed.
    let cancelled = h.orchestrator.cancel_order(order_id, user).await.unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 5);

    h.settle().await;

    // The late PaymentFailed must not release a second time.
    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(order.payment_status(), PaymentStatus::Failed);
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 5);
}

#[tokio::test]
async fn test_user_cancellation_stands_against_late_completion() {
    let h = TestHarness::new().await;
    let user = h.stock_and_fill_cart().await;

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    let order_id = order.id().unwrap();

    h.orchestrator.cancel_order(order_id, user).await.unwrap();
    h.settle().await;

    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Cancelled);
    // The settled payment is recorded for an out-of-band refund.
    assert_eq!(order.payment_status(), PaymentStatus::Completed);
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 5);
}

#[tokio::test]
async fn test_payment_store_outage_still_cancels_by_order_id() {
    let h = TestHarness::new().await;
    let user = h.stock_and_fill_cart().await;
    h.payments.set_fail_on_insert(true).await;

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    let order_id = order.id().unwrap();

    h.settle().await;

    // No payment record exists, yet the order is compensated via the
    // null-payment-id failure event.
    assert_eq!(h.payments.payment_count().await, 0);
    let order = h.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert!(order.payment_ref().is_none());
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 5);
}

#[tokio::test]
async fn test_poison_message_is_dead_lettered() {
    let h = TestHarness::new().await;

    h.broker
        .publish(
            topology::ORDER_EXCHANGE,
            topology::ORDER_CREATED_KEY,
            serde_json::json!("not an order event"),
        )
        .await
        .unwrap();
    h.settle().await;

    let dead = h.broker.dead_letters_for(topology::ORDER_CREATED_QUEUE).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(h.payments.payment_count().await, 0);
}

#[tokio::test]
async fn test_refund_after_confirmation() {
    let h = TestHarness::new().await;
    let user = h.stock_and_fill_cart().await;

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    let order_id = order.id().unwrap();
    h.settle().await;

    let payments = h.payments.for_order(order_id).await.unwrap();
    let outcome = h
        .processor
        .process_refund(payments[0].payment_ref())
        .await
        .unwrap();

    assert!(outcome.refund_id.starts_with("REFUND-"));
    assert_eq!(outcome.amount.cents(), 2000);
    let refunded = h.processor.payment_by_ref(payments[0].payment_ref()).await.unwrap();
    assert_eq!(refunded.status(), PaymentStatus::Refunded);
}

#[tokio::test]
async fn test_refund_before_settlement_is_rejected() {
    let h = TestHarness::new().await;
    let user = h.stock_and_fill_cart().await;

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    let order_id = order.id().unwrap();

    // Deliver OrderCreated so the payment record exists, but keep the worker
    // idle: the payment is still Pending.
    h.broker.run_pending().await;

    let payments = h.payments.for_order(order_id).await.unwrap();
    let result = h.processor.process_refund(payments[0].payment_ref()).await;

    assert!(matches!(result, Err(FulfillmentError::InvalidRequest(_))));
    let unchanged = h.payments.for_order(order_id).await.unwrap();
    assert_eq!(unchanged[0].status(), PaymentStatus::Pending);
}

#[tokio::test]
async fn test_independent_orders_settle_independently() {
    let h = TestHarness::new().await;
    h.inventory.set_stock(ProductId::new(1), 10).await;

    let first_user = UserId::new(1);
    h.cart
        .set_lines(
            first_user,
            vec![CartLine::new(ProductId::new(1), "Widget", 2, Money::from_cents(1000))],
        )
        .await;
    let first = h
        .orchestrator
        .create_order(first_user, AddressId::new(10))
        .await
        .unwrap();
    h.settle().await;

    h.set_gateway_approves(false);
    let second_user = UserId::new(2);
    h.cart
        .set_lines(
            second_user,
            vec![CartLine::new(ProductId::new(1), "Widget", 3, Money::from_cents(1000))],
        )
        .await;
    let second = h
        .orchestrator
        .create_order(second_user, AddressId::new(11))
        .await
        .unwrap();
    h.settle().await;

    let first = h.order(first.id().unwrap()).await;
    let second = h.order(second.id().unwrap()).await;
    assert_eq!(first.status(), OrderStatus::Confirmed);
    assert_eq!(second.status(), OrderStatus::Cancelled);

    // 10 - 2 committed (first) - 3 + 3 released (second) = 8.
    assert_eq!(h.inventory.stock_of(ProductId::new(1)).await, 8);
}

#[tokio::test]
async fn test_persisted_totals_match_recomputation() {
    let h = TestHarness::new().await;
    let user = UserId::new(1);
    h.inventory.set_stock(ProductId::new(1), 5).await;
    h.inventory.set_stock(ProductId::new(2), 5).await;
    h.cart
        .set_lines(
            user,
            vec![
                CartLine::new(ProductId::new(1), "Widget", 2, Money::from_cents(1099)),
                CartLine::new(ProductId::new(2), "Gadget", 3, Money::from_cents(250)),
            ],
        )
        .await;

    let order = h
        .orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .unwrap();
    h.settle().await;

    let order = h.order(order.id().unwrap()).await;
    let recomputed: i64 = order
        .lines()
        .iter()
        .map(|line| line.unit_price.cents() * i64::from(line.quantity))
        .sum();
    assert_eq!(order.total_amount().cents(), recomputed);
    assert_eq!(recomputed, 2 * 1099 + 3 * 250);

    // The payment charged exactly that amount.
    let payments = h.payments.for_order(order.id().unwrap()).await.unwrap();
    assert_eq!(payments[0].amount().cents(), recomputed);
}
