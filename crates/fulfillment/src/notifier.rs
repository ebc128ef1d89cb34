//! Notification dispatcher: best-effort, never part of the saga outcome.

use async_trait::async_trait;
use bus::{MessageEnvelope, MessageHandler};
use domain::OrderStatusChanged;

use crate::error::FulfillmentError;

/// Remote port to the notification service.
///
/// Content rendering and channel selection (email, SMS) live behind this
/// seam; the saga only hands over the status transition.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// Notifies the user about an order status transition.
    async fn order_status_changed(&self, event: &OrderStatusChanged)
    -> Result<(), FulfillmentError>;
}

/// Notification port that just logs the message.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationPort for LoggingNotifier {
    async fn order_status_changed(
        &self,
        event: &OrderStatusChanged,
    ) -> Result<(), FulfillmentError> {
        tracing::info!(
            user_id = %event.user_id,
            order_number = %event.order_number,
            old_status = %event.old_status,
            new_status = %event.new_status,
            "notifying user of order status change"
        );
        Ok(())
    }
}

/// Bus consumer feeding the notification port.
///
/// Every error, undecodable payloads included, is logged and swallowed:
/// notification is best-effort and must never trigger redelivery or flow
/// back into the saga.
pub struct NotificationDispatcher<N: NotificationPort> {
    notifier: N,
}

impl<N: NotificationPort> NotificationDispatcher<N> {
    /// Creates a dispatcher over the given port.
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl<N: NotificationPort + 'static> MessageHandler for NotificationDispatcher<N> {
    async fn handle(&self, message: &MessageEnvelope) -> bus::Result<()> {
        let event: OrderStatusChanged = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable notification message");
                return Ok(());
            }
        };

        if let Err(e) = self.notifier.order_status_changed(&event).await {
            tracing::warn!(
                error = %e,
                order_number = %event.order_number,
                "notification failed, dropping"
            );
        }
        Ok(())
    }
}
