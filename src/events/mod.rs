use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handle for publishing domain events onto the in-process channel
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

    /// Sends an event, logging instead of failing when the consumer is gone
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping event");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartUpdated {
        cart_id: Uuid,
        user_id: Uuid,
    },
    CartCleared {
        user_id: Uuid,
    },

    // Order events
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentCaptured {
        order_id: Uuid,
        transaction_ref: String,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },

    // Promotion events
    CouponRedeemed {
        coupon_id: Uuid,
        order_id: Uuid,
    },

    // Stock events
    StockAdjusted {
        product_id: Uuid,
        sku: Option<String>,
        old_quantity: i32,
        new_quantity: i32,
    },
}

/// Drains the event channel, logging each event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                total,
            } => {
                info!(order_id = %order_id, order_number = %order_number, total = %total, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, from = %old_status, to = %new_status, "order status changed");
            }
            Event::PaymentCaptured {
                order_id,
                transaction_ref,
            } => {
                info!(order_id = %order_id, transaction_ref = %transaction_ref, "payment captured");
            }
            Event::PaymentFailed { order_id, reason } => {
                warn!(order_id = %order_id, reason = %reason, "payment failed");
            }
            other => debug!(event = ?other, "event received"),
        }
    }

    info!("Event channel closed; event processing loop stopped");
}
