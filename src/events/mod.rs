use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event after a commit. A closed or full channel never fails the caller.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "dropping event");
        }
    }
}

/// Things that happened to orders, payments and wallets after their transaction committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        order_number: String,
        total: Decimal,
        method: String,
    },
    PaymentIntentCreated {
        token: String,
        user_id: Uuid,
        settlement_amount: Decimal,
        settlement_currency: String,
    },
    PaymentCaptured {
        token: String,
        order_id: Uuid,
    },
    PendingPaymentAbandoned {
        token: String,
        user_id: Uuid,
    },
    OrderCanceled {
        order_id: Uuid,
        user_id: Uuid,
        refunded: Option<Decimal>,
    },
    OrderReturned {
        order_id: Uuid,
        user_id: Uuid,
        reason: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    WalletCredited {
        user_id: Uuid,
        amount: Decimal,
        order_id: Option<Uuid>,
    },
    WalletDebited {
        user_id: Uuid,
        amount: Decimal,
        order_id: Option<Uuid>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "order_placed",
            Event::PaymentIntentCreated { .. } => "payment_intent_created",
            Event::PaymentCaptured { .. } => "payment_captured",
            Event::PendingPaymentAbandoned { .. } => "pending_payment_abandoned",
            Event::OrderCanceled { .. } => "order_canceled",
            Event::OrderReturned { .. } => "order_returned",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::WalletCredited { .. } => "wallet_credited",
            Event::WalletDebited { .. } => "wallet_debited",
        }
    }
}

/// Outbound notification (email, push) for a committed event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &Event, at: DateTime<Utc>) -> Result<(), String>;
}

/// Notifier that only writes the event to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &Event, at: DateTime<Utc>) -> Result<(), String> {
        match event {
            Event::OrderPlaced {
                order_number,
                user_id,
                total,
                method,
                ..
            } => {
                info!(%order_number, %user_id, %total, %method, at = %at, "order confirmation queued");
            }
            Event::OrderCanceled {
                order_id, refunded, ..
            } => {
                info!(%order_id, refunded = ?refunded, "cancellation notice queued");
            }
            other => {
                info!(event = other.name(), "event recorded");
            }
        }
        Ok(())
    }
}

/// Drains the event channel and fans each event out to every notifier.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifiers: Vec<Arc<dyn Notifier>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let at = Utc::now();
        metrics::counter!("storefront_events_total", 1, "event" => event.name());

        if let Event::PendingPaymentAbandoned { token, .. } = &event {
            warn!(%token, "pending payment abandoned");
        }

        let results = join_all(notifiers.iter().map(|n| n.notify(&event, at))).await;
        for err in results.into_iter().filter_map(Result::err) {
            error!(event = event.name(), error = %err, "notifier failed");
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, event: &Event, _at: DateTime<Utc>) -> Result<(), String> {
            self.0.lock().unwrap().push(event.name());
            Ok(())
        }
    }

    #[tokio::test]
    async fn process_events_delivers_to_every_notifier() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let recorder = Arc::new(Recording::default());

        sender
            .send_or_log(Event::PaymentCaptured {
                token: "tok".into(),
                order_id: Uuid::new_v4(),
            })
            .await;
        drop(sender);

        process_events(rx, vec![recorder.clone(), Arc::new(LogNotifier)]).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec!["payment_captured"]);
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        EventSender::new(tx)
            .send_or_log(Event::OrderStatusChanged {
                order_id: Uuid::new_v4(),
                old_status: "Pending".into(),
                new_status: "Shipped".into(),
            })
            .await;
    }
}
