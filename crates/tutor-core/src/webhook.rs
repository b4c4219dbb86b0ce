//! # Webhook Ingestion
//!
//! Translates processor events into orchestrator transitions. Delivery is
//! at-least-once and unordered, so every event is checked against the
//! payment's current state first and replays resolve to `Duplicate`.

use crate::error::{BookingError, BookingResult};
use crate::orchestrator::{PaymentOrchestrator, Settlement};
use crate::payment::PaymentStatus;
use crate::processor::ProcessorStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Event types the engine reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProcessorEventType {
    /// `checkout.completed`
    CheckoutCompleted,
    /// `checkout.failed`
    CheckoutFailed,
    /// `checkout.expired`
    CheckoutExpired,
    /// Anything else the processor sends
    Other(String),
}

impl ProcessorEventType {
    pub fn as_str(&self) -> &str {
        match self {
            ProcessorEventType::CheckoutCompleted => "checkout.completed",
            ProcessorEventType::CheckoutFailed => "checkout.failed",
            ProcessorEventType::CheckoutExpired => "checkout.expired",
            ProcessorEventType::Other(raw) => raw,
        }
    }
}

impl From<String> for ProcessorEventType {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "checkout.completed" => ProcessorEventType::CheckoutCompleted,
            "checkout.failed" => ProcessorEventType::CheckoutFailed,
            "checkout.expired" => ProcessorEventType::CheckoutExpired,
            _ => ProcessorEventType::Other(raw),
        }
    }
}

impl From<ProcessorEventType> for String {
    fn from(event_type: ProcessorEventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl fmt::Display for ProcessorEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-neutral event extracted from a webhook payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorEvent {
    pub event_type: ProcessorEventType,
    /// Processor checkout id; the idempotency key for the event
    pub checkout_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// What happened to an acknowledged event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAck {
    /// A transition was applied
    Applied,
    /// The payment was already in the resulting state
    Duplicate,
    /// Event type not handled, or the outcome was inconclusive
    Ignored,
    /// No payment carries this checkout id
    UnknownPayment,
    /// Money captured for a booking that no longer needed it; refunded
    /// or flagged for reconciliation
    LateCapture,
}

impl WebhookAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookAck::Applied => "applied",
            WebhookAck::Duplicate => "duplicate",
            WebhookAck::Ignored => "ignored",
            WebhookAck::UnknownPayment => "unknown_payment",
            WebhookAck::LateCapture => "late_capture",
        }
    }
}

#[derive(Clone)]
pub struct WebhookIngestor {
    orchestrator: PaymentOrchestrator,
}

impl WebhookIngestor {
    pub fn new(orchestrator: PaymentOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Apply one processor event. Errors are reserved for failures the
    /// processor should redeliver (ledger trouble, consistency violations).
    #[instrument(
        skip(self, event),
        fields(event_type = %event.event_type, checkout_id = %event.checkout_id)
    )]
    pub async fn handle_event(&self, event: ProcessorEvent) -> BookingResult<WebhookAck> {
        let payment = match self.orchestrator.payment_for_checkout(&event.checkout_id).await {
            Ok(payment) => payment,
            Err(BookingError::UnknownPayment { checkout_id }) => {
                warn!("Webhook for unknown checkout {}; acknowledging", checkout_id);
                return Ok(WebhookAck::UnknownPayment);
            }
            Err(err) => return Err(err),
        };

        let ack = match event.event_type {
            ProcessorEventType::CheckoutCompleted => {
                if payment.status.is_paid() {
                    WebhookAck::Duplicate
                } else {
                    let status = ProcessorStatus::Paid {
                        transaction_id: event.transaction_id,
                    };
                    match self.orchestrator.confirm_payment(payment.id, status).await? {
                        Settlement::Confirmed { .. } => WebhookAck::Applied,
                        Settlement::AlreadyConfirmed(_) => WebhookAck::Duplicate,
                        Settlement::LateCapture { .. } => WebhookAck::LateCapture,
                        _ => WebhookAck::Ignored,
                    }
                }
            }
            ProcessorEventType::CheckoutFailed | ProcessorEventType::CheckoutExpired => {
                if payment.status == PaymentStatus::Failed {
                    WebhookAck::Duplicate
                } else {
                    match self
                        .orchestrator
                        .confirm_payment(payment.id, ProcessorStatus::Failed)
                        .await?
                    {
                        Settlement::Failed(_) => WebhookAck::Applied,
                        Settlement::AlreadyFailed(_) => WebhookAck::Duplicate,
                        _ => WebhookAck::Ignored,
                    }
                }
            }
            ProcessorEventType::Other(ref raw) => {
                debug!("Unhandled webhook event type: {}", raw);
                WebhookAck::Ignored
            }
        };

        info!("Webhook for payment {} handled: {}", payment.id, ack.as_str());
        Ok(ack)
    }
}
