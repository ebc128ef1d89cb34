//! Payment processor: the asynchronous half of the fulfillment saga.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{EventPublisher, MessageEnvelope, MessageHandler, topology};
use common::{Money, OrderId, UserId};
use domain::{
    OrderCreated, Payment, PaymentCompleted, PaymentFailed, PaymentMethod, PublishEventExt,
};
use store::PaymentStore;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::FulfillmentError;
use crate::gateway::PaymentGateway;

/// Result of a successful refund.
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    /// Refund ID assigned by the gateway.
    pub refund_id: String,
    /// Amount handed back.
    pub amount: Money,
}

struct Inner<P, G, B>
where
    P: PaymentStore,
    G: PaymentGateway,
    B: EventPublisher,
{
    payments: P,
    gateway: G,
    bus: B,
}

fn persisted_id(payment: &Payment) -> Result<i64, FulfillmentError> {
    payment.id().ok_or_else(|| {
        FulfillmentError::Infrastructure("payment id missing after insert".to_string())
    })
}

/// Consumes `OrderCreated`, records payments, and charges the gateway.
///
/// The event handler only creates the payment record and enqueues it; the
/// gateway call runs on the [`PaymentWorker`], so consumption never blocks
/// on simulated network latency. Failures during async processing are
/// recorded on the payment and converted into `PaymentFailed` events;
/// nothing is re-thrown, since no caller is waiting.
pub struct PaymentProcessor<P, G, B>
where
    P: PaymentStore,
    G: PaymentGateway,
    B: EventPublisher,
{
    inner: Arc<Inner<P, G, B>>,
    queue: mpsc::UnboundedSender<i64>,
}

/// Worker task draining the payment queue.
pub struct PaymentWorker<P, G, B>
where
    P: PaymentStore,
    G: PaymentGateway,
    B: EventPublisher,
{
    inner: Arc<Inner<P, G, B>>,
    queue: Mutex<mpsc::UnboundedReceiver<i64>>,
}

impl<P, G, B> PaymentProcessor<P, G, B>
where
    P: PaymentStore + 'static,
    G: PaymentGateway + 'static,
    B: EventPublisher + 'static,
{
    /// Creates a processor and the worker that drains its queue.
    pub fn new(payments: P, gateway: G, bus: B) -> (Self, PaymentWorker<P, G, B>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            payments,
            gateway,
            bus,
        });
        (
            Self {
                inner: Arc::clone(&inner),
                queue: tx,
            },
            PaymentWorker {
                inner,
                queue: Mutex::new(rx),
            },
        )
    }

    /// Handles an order creation event.
    ///
    /// Creates the payment in `Pending` and hands it to the worker. If the
    /// record cannot be created at all, a `PaymentFailed` with a null
    /// payment ID goes out so the reconciler can still compensate by order
    /// ID alone.
    #[tracing::instrument(skip(self, event), fields(order_number = %event.order_number))]
    pub async fn on_order_created(&self, event: &OrderCreated) -> Result<(), FulfillmentError> {
        tracing::info!("received order created event");

        match self.create_payment(event).await {
            Ok(payment_id) => {
                self.queue.send(payment_id).map_err(|_| {
                    FulfillmentError::Infrastructure("payment worker is gone".to_string())
                })?;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to handle order created event");
                metrics::counter!("payments_failed_total").increment(1);
                self.inner
                    .bus
                    .publish_event(&PaymentFailed::now(None, event.order_id, e.to_string()))
                    .await?;
                Ok(())
            }
        }
    }

    /// Refunds a completed payment.
    ///
    /// Allowed only from `Completed`; any other status is rejected before
    /// the gateway is called. A gateway decline leaves the status unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn process_refund(
        &self,
        payment_ref: &str,
    ) -> Result<RefundOutcome, FulfillmentError> {
        let payment = self.load_by_ref(payment_ref).await?;

        if !payment.status().can_refund() {
            return Err(FulfillmentError::InvalidRequest(format!(
                "Cannot refund payment with status: {}",
                payment.status()
            )));
        }
        let transaction_id = payment.transaction_id().ok_or_else(|| {
            FulfillmentError::Infrastructure("completed payment has no transaction id".to_string())
        })?;

        tracing::info!(payment_ref, "processing refund");
        let refund = self
            .inner
            .gateway
            .refund(transaction_id, payment.amount())
            .await
            .map_err(|e| FulfillmentError::Gateway(e.to_string()))?;

        let id = persisted_id(&payment)?;
        self.inner
            .payments
            .update(id, |payment| payment.refund())
            .await?;
        metrics::counter!("payments_refunded_total").increment(1);
        tracing::info!(payment_ref, refund_id = %refund.refund_id, "refund processed");

        Ok(RefundOutcome {
            refund_id: refund.refund_id,
            amount: payment.amount(),
        })
    }

    /// Loads a payment by its external reference.
    pub async fn payment_by_ref(&self, payment_ref: &str) -> Result<Payment, FulfillmentError> {
        self.load_by_ref(payment_ref).await
    }

    /// Returns all payments for an order.
    pub async fn payments_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<Payment>, FulfillmentError> {
        Ok(self.inner.payments.for_order(order_id).await?)
    }

    /// Returns a user's payment history.
    pub async fn payments_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Payment>, FulfillmentError> {
        Ok(self.inner.payments.for_user(user_id).await?)
    }

    async fn create_payment(&self, event: &OrderCreated) -> Result<i64, FulfillmentError> {
        let payment = Payment::create(
            event.order_id,
            event.user_id,
            event.total_amount,
            PaymentMethod::default(),
        );
        let payment = self.inner.payments.insert(payment).await?;
        tracing::info!(payment_ref = %payment.payment_ref(), "created payment record");
        persisted_id(&payment)
    }

    async fn load_by_ref(&self, payment_ref: &str) -> Result<Payment, FulfillmentError> {
        self.inner
            .payments
            .get_by_ref(payment_ref)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound {
                kind: "Payment",
                id: payment_ref.to_string(),
            })
    }
}

#[async_trait]
impl<P, G, B> MessageHandler for PaymentProcessor<P, G, B>
where
    P: PaymentStore + 'static,
    G: PaymentGateway + 'static,
    B: EventPublisher + 'static,
{
    async fn handle(&self, message: &MessageEnvelope) -> bus::Result<()> {
        debug_assert_eq!(message.routing_key, topology::ORDER_CREATED_KEY);
        let event: OrderCreated = message.decode()?;
        self.on_order_created(&event).await?;
        Ok(())
    }
}

impl<P, G, B> PaymentWorker<P, G, B>
where
    P: PaymentStore + 'static,
    G: PaymentGateway + 'static,
    B: EventPublisher + 'static,
{
    /// Processes already-queued payments, returning how many were handled.
    ///
    /// Deterministic drive for tests; production uses [`PaymentWorker::spawn`].
    pub async fn run_until_idle(&self) -> usize {
        let mut handled = 0;
        loop {
            let next = self.queue.lock().await.try_recv();
            match next {
                Ok(payment_id) => {
                    self.inner.process(payment_id).await;
                    handled += 1;
                }
                Err(_) => return handled,
            }
        }
    }

    /// Runs forever, processing payments as they are enqueued.
    pub async fn run(self) {
        loop {
            let next = self.queue.lock().await.recv().await;
            match next {
                Some(payment_id) => self.inner.process(payment_id).await,
                None => return,
            }
        }
    }

    /// Spawns the worker onto the runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

impl<P, G, B> Inner<P, G, B>
where
    P: PaymentStore,
    G: PaymentGateway,
    B: EventPublisher,
{
    /// The async payment step: `Pending → Processing → {Completed, Failed}`.
    #[tracing::instrument(skip(self))]
    async fn process(&self, payment_id: i64) {
        let payment = match self.payments.get(payment_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                tracing::error!(payment_id, "payment disappeared before processing");
                return;
            }
            Err(e) => {
                tracing::error!(payment_id, error = %e, "failed to load payment");
                return;
            }
        };

        let order_id = payment.order_id();
        let payment_ref = payment.payment_ref().to_string();
        let start = std::time::Instant::now();

        match self.attempt_charge(payment_id, &payment).await {
            Ok(completed) => {
                metrics::counter!("payments_completed_total").increment(1);
                metrics::histogram!("payment_processing_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(payment_ref = %payment_ref, "payment completed");

                let event = PaymentCompleted {
                    payment_id: payment_ref,
                    order_id,
                    user_id: completed.user_id(),
                    amount: completed.amount(),
                    transaction_id: completed.transaction_id().unwrap_or_default().to_string(),
                    completed_at: completed.updated_at(),
                };
                if let Err(e) = self.bus.publish_event(&event).await {
                    tracing::error!(error = %e, "failed to publish payment completed event");
                }
            }
            Err(e) => {
                metrics::counter!("payments_failed_total").increment(1);
                tracing::warn!(payment_ref = %payment_ref, error = %e, "payment failed");

                let reason = e.to_string();
                if let Err(update_err) = self
                    .payments
                    .update(payment_id, |payment| payment.fail(reason.as_str()))
                    .await
                {
                    tracing::error!(error = %update_err, "failed to record payment failure");
                }

                let event = PaymentFailed::now(Some(payment_ref), order_id, reason);
                if let Err(publish_err) = self.bus.publish_event(&event).await {
                    tracing::error!(error = %publish_err, "failed to publish payment failed event");
                }
            }
        }
    }

    async fn attempt_charge(
        &self,
        payment_id: i64,
        payment: &Payment,
    ) -> Result<Payment, FulfillmentError> {
        self.payments
            .update(payment_id, |payment| payment.begin_processing())
            .await?;

        let charge = self
            .gateway
            .charge(payment.amount(), payment.method())
            .await
            .map_err(|e| FulfillmentError::Gateway(e.to_string()))?;

        let completed = self
            .payments
            .update(payment_id, |payment| {
                payment.complete(
                    charge.transaction_id.as_str(),
                    format!("approved (code {})", charge.response_code),
                )
            })
            .await?;
        Ok(completed)
    }
}
