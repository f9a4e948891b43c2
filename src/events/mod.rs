use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the order and payment services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(Uuid),
    OrderRejected(Uuid),

    PaymentSucceeded {
        order_id: Uuid,
        transaction_id: Uuid,
    },
    PaymentAuthorized {
        order_id: Uuid,
        transaction_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
        transaction_id: Uuid,
    },

    StockRecorded {
        product_id: Uuid,
        quantity: i32,
    },
    CartCleared {
        customer_id: Uuid,
        items_removed: u64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
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
}

/// Background consumer for the event channel. Downstream delivery
/// (webhooks, notification fan-out) hangs off this loop; for now each
/// event is logged.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, from = %old_status, to = %new_status, "Order status changed");
            }
            Event::OrderCancelled(order_id) => {
                info!(order_id = %order_id, "Order cancelled");
            }
            Event::OrderRejected(order_id) => {
                info!(order_id = %order_id, "Order rejected");
            }
            Event::PaymentSucceeded {
                order_id,
                transaction_id,
            } => {
                info!(order_id = %order_id, transaction_id = %transaction_id, "Payment succeeded");
            }
            Event::PaymentAuthorized {
                order_id,
                transaction_id,
            } => {
                info!(order_id = %order_id, transaction_id = %transaction_id, "Payment authorized");
            }
            Event::PaymentFailed {
                order_id,
                transaction_id,
            } => {
                warn!(order_id = %order_id, transaction_id = %transaction_id, "Payment failed");
            }
            Event::StockRecorded {
                product_id,
                quantity,
            } => {
                info!(product_id = %product_id, quantity = quantity, "Sale recorded against stock");
            }
            Event::CartCleared {
                customer_id,
                items_removed,
            } => {
                info!(customer_id = %customer_id, items_removed = items_removed, "Cart cleared after checkout");
            }
        }
    }
}
