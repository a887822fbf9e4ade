use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
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

    /// Sends an event, logging instead of failing when the channel is down.
    /// Used on paths where event delivery must never abort the request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            error!("Event delivery failed: {}", e);
        }
    }
}

// The events that can occur across checkout and tour flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Checkout session events
    CheckoutSessionCreated {
        session_id: Uuid,
        user_id: String,
    },
    CheckoutCompleted {
        session_id: Uuid,
        transaction_id: String,
    },
    PaymentMethodSelected {
        session_id: Uuid,
        provider: String,
    },
    ReturnedToMethodSelection {
        session_id: Uuid,
    },

    // Coupon events
    CouponApplied {
        session_id: Uuid,
        code: String,
        discount_amount: Decimal,
    },
    CouponRemoved {
        session_id: Uuid,
        code: String,
    },
    CouponConsumptionFailed {
        session_id: Uuid,
        code: String,
        reason: String,
    },

    // Payment events
    PaymentPending {
        session_id: Uuid,
        transaction_id: String,
        provider: String,
        amount: Decimal,
    },
    PaymentCompleted {
        session_id: Uuid,
        transaction_id: String,
        provider: String,
        amount: Decimal,
    },
    PaymentFailed {
        session_id: Uuid,
        provider: String,
        reason: String,
    },
    PaymentCompensated {
        session_id: Uuid,
        transaction_id: String,
    },
    CompensationFailed {
        session_id: Uuid,
        transaction_id: String,
        reason: String,
    },

    // Receipt events
    ReceiptRequested {
        transaction_id: String,
    },
    ReceiptFailed {
        transaction_id: String,
        reason: String,
    },

    // Guided tour events
    TourStarted {
        user_id: String,
        tour_id: String,
    },
    TourStepChanged {
        user_id: String,
        tour_id: String,
        step_index: usize,
    },
    TourCompleted {
        user_id: String,
        tour_id: String,
    },
    TourSkipped {
        user_id: String,
        tour_id: String,
        step_index: usize,
    },
    TourClosed {
        user_id: String,
        tour_id: String,
        step_index: usize,
    },
}

impl Event {
    /// Timestamped envelope used when events are forwarded to external sinks.
    pub fn with_data(self) -> EventEnvelope {
        EventEnvelope {
            event: self,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: Event,
    pub occurred_at: DateTime<Utc>,
}

// Drains the event channel and routes each event to its handler.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!("Received event: {:?}", event);

        match event {
            Event::PaymentCompleted {
                session_id,
                ref transaction_id,
                ref provider,
                amount,
            } => {
                info!(
                    "Payment completed: session_id={}, transaction_id={}, provider={}, amount={}",
                    session_id, transaction_id, provider, amount
                );
            }
            Event::PaymentFailed {
                session_id,
                ref provider,
                ref reason,
            } => {
                warn!(
                    "Payment failed: session_id={}, provider={}, reason={}",
                    session_id, provider, reason
                );
            }
            Event::CompensationFailed {
                session_id,
                ref transaction_id,
                ref reason,
            } => {
                // A pending transaction row could not be cleaned up after a
                // failed charge. Surface loudly so reconciliation can pick it up.
                error!(
                    "Compensating delete failed: session_id={}, transaction_id={}, reason={}",
                    session_id, transaction_id, reason
                );
            }
            Event::CouponConsumptionFailed {
                session_id,
                ref code,
                ref reason,
            } => {
                // The charge already succeeded; the coupon stays redeemable.
                warn!(
                    "Coupon consumption failed after capture: session_id={}, code={}, reason={}",
                    session_id, code, reason
                );
            }
            Event::ReceiptFailed {
                ref transaction_id,
                ref reason,
            } => {
                warn!(
                    "Receipt dispatch failed: transaction_id={}, reason={}",
                    transaction_id, reason
                );
            }
            Event::TourCompleted {
                ref user_id,
                ref tour_id,
            } => {
                info!("Tour completed: user_id={}, tour_id={}", user_id, tour_id);
            }
            _ => {
                info!("No specific handler for event: {:?}", event);
            }
        }
    }

    warn!("Event processing loop has ended");
}
