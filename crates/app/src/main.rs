//! Fulfillment demo entry point.
//!
//! Wires the saga end to end over the in-memory broker, runs one order
//! through creation, payment, and reconciliation, and logs the outcome.

use std::sync::Arc;
use std::time::Duration;

use bus::{InMemoryBroker, Topology, topology};
use common::{AddressId, Money, OrderId, ProductId, UserId};
use domain::OrderStatus;
use fulfillment::{
    CartLine, GatewayConfig, InMemoryCart, InMemoryInventory, LoggingNotifier,
    NotificationDispatcher, OrderOrchestrator, OrderReconciler, PaymentProcessor, SimulatedGateway,
};
use store::{InMemoryOrderStore, InMemoryPaymentStore, OrderStore, PaymentStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let gateway_config = GatewayConfig::from_env();
    tracing::info!(
        delay_ms = gateway_config.delay.as_millis() as u64,
        success_rate = gateway_config.success_rate,
        "starting fulfillment demo"
    );

    // Broker and stores.
    let broker = InMemoryBroker::new(Topology::fulfillment());
    let orders = InMemoryOrderStore::new();
    let payments = InMemoryPaymentStore::new();
    let inventory = InMemoryInventory::new();
    let cart = InMemoryCart::new();

    // Saga components.
    let orchestrator = OrderOrchestrator::new(
        cart.clone(),
        inventory.clone(),
        orders.clone(),
        broker.clone(),
    );
    let gateway = SimulatedGateway::from_config(&gateway_config);
    let (processor, worker) = PaymentProcessor::new(payments.clone(), gateway, broker.clone());
    let reconciler = Arc::new(OrderReconciler::new(
        orders.clone(),
        inventory.clone(),
        broker.clone(),
    ));

    // Bind consumers to their queues.
    broker
        .register_handler(topology::ORDER_CREATED_QUEUE, Arc::new(processor))
        .await
        .expect("order created queue missing");
    broker
        .register_handler(topology::PAYMENT_COMPLETED_QUEUE, reconciler.clone())
        .await
        .expect("payment completed queue missing");
    broker
        .register_handler(topology::PAYMENT_FAILED_QUEUE, reconciler)
        .await
        .expect("payment failed queue missing");
    broker
        .register_handler(
            topology::ORDER_STATUS_CHANGED_QUEUE,
            Arc::new(NotificationDispatcher::new(LoggingNotifier)),
        )
        .await
        .expect("order status changed queue missing");

    worker.spawn();
    broker.spawn_dispatcher();

    // Seed a catalog and a cart, then run one order through the saga.
    let user = UserId::new(1);
    inventory.set_stock(ProductId::new(1), 5).await;
    inventory.set_stock(ProductId::new(2), 3).await;
    cart.set_lines(
        user,
        vec![
            CartLine::new(ProductId::new(1), "Mechanical Keyboard", 2, Money::from_cents(8900)),
            CartLine::new(ProductId::new(2), "USB-C Cable", 1, Money::from_cents(1250)),
        ],
    )
    .await;

    let order = orchestrator
        .create_order(user, AddressId::new(10))
        .await
        .expect("order creation failed");
    let order_id = order.id().expect("order id missing");
    tracing::info!(
        order_number = %order.order_number(),
        total = %order.total_amount(),
        "order placed, waiting for payment outcome"
    );

    let settled = wait_for_settlement(&orders, order_id, gateway_config.delay).await;
    report(&orders, &payments, &inventory, order_id).await;

    if !settled {
        tracing::warn!("order did not settle in time");
    }
}

/// Polls the order until it leaves `Pending` or the deadline passes.
async fn wait_for_settlement(
    orders: &InMemoryOrderStore,
    order_id: OrderId,
    gateway_delay: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + gateway_delay + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if let Ok(Some(order)) = orders.get(order_id).await
            && order.status() != OrderStatus::Pending
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

async fn report(
    orders: &InMemoryOrderStore,
    payments: &InMemoryPaymentStore,
    inventory: &InMemoryInventory,
    order_id: OrderId,
) {
    let Ok(Some(order)) = orders.get(order_id).await else {
        tracing::error!(%order_id, "order disappeared");
        return;
    };

    tracing::info!(
        order_number = %order.order_number(),
        status = %order.status(),
        payment_status = %order.payment_status(),
        total = %order.total_amount(),
        "final order state"
    );

    match payments.for_order(order_id).await {
        Ok(list) => {
            for payment in list {
                tracing::info!(
                    payment_ref = %payment.payment_ref(),
                    status = %payment.status(),
                    transaction_id = payment.transaction_id().unwrap_or("-"),
                    "payment record"
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to load payments"),
    }

    for product in [ProductId::new(1), ProductId::new(2)] {
        tracing::info!(%product, stock = inventory.stock_of(product).await, "remaining stock");
    }
}
