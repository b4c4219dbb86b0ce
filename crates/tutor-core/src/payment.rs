//! # Payment Types
//!
//! Payment attempts against a booking, the append-only refund ledger, and
//! invoices for paid attempts.

use crate::booking::{Booking, UserId};
use crate::pricing::Currency;
use crate::error::{BookingError, BookingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, no processor checkout yet
    Pending,
    /// Processor checkout issued, awaiting outcome
    Processing,
    /// Paid
    Completed,
    /// Declined, cancelled or abandoned
    Failed,
    /// Fully refunded
    Refunded,
    /// Partially refunded
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    /// Only one active payment may exist per booking
    pub fn is_active(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Money was captured at some point; the booking cannot be paid again
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        )
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Completed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Refunded)
                | (Completed, PartiallyRefunded)
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payment attempt for a booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,

    pub booking_id: Uuid,

    pub user_id: UserId,

    /// Amount in minor units, copied from the booking price
    pub amount: i64,

    pub currency: Currency,

    pub description: String,

    pub status: PaymentStatus,

    /// Processor checkout id (idempotency key for webhooks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_checkout_id: Option<String>,

    /// Hosted checkout page, when the processor provides one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_transaction_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// A fresh Pending attempt for `booking`
    pub fn for_booking(
        booking: &Booking,
        user_id: UserId,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Self {
        let description = match &booking.course_ref {
            Some(course) => format!("Booking for {} on {}", course, booking.date),
            None => format!("Booking for tutoring session on {}", booking.date),
        };
        Self {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            user_id,
            amount: booking.price,
            currency,
            description,
            status: PaymentStatus::Pending,
            external_checkout_id: None,
            checkout_url: None,
            external_transaction_id: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Reference sent to the processor with the checkout
    pub fn checkout_reference(&self) -> String {
        format!("TH-{}", self.id)
    }

    pub fn amount_display(&self) -> String {
        self.currency.display(self.amount)
    }
}

/// Append-only refund record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,

    pub payment_id: Uuid,

    /// Minor units
    pub amount: i64,

    pub reason: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_refund_id: Option<String>,

    pub processed_at: DateTime<Utc>,
}

impl Refund {
    pub fn new(
        payment_id: Uuid,
        amount: i64,
        reason: impl Into<String>,
        external_refund_id: Option<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            amount,
            reason: reason.into(),
            external_refund_id,
            processed_at,
        }
    }
}

/// Amount kept after refunds
pub fn effective_paid_amount(payment: &Payment, refunds: &[Refund]) -> i64 {
    payment.amount - refunds.iter().map(|r| r.amount).sum::<i64>()
}

/// Who the invoice is addressed to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingDetails {
    pub billing_name: String,
    pub billing_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<String>,
}

impl BillingDetails {
    pub fn validate(&self) -> BookingResult<()> {
        if self.billing_name.trim().is_empty() {
            return Err(BookingError::InvalidRequest(
                "billing_name is required".to_string(),
            ));
        }
        let email = self.billing_email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(BookingError::InvalidRequest(format!(
                "invalid billing_email: {:?}",
                self.billing_email
            ))),
        }
    }
}

/// One invoice per paid payment, numbered `TH-YYYYMM-NNNN`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,

    pub payment_id: Uuid,

    pub invoice_number: String,

    #[serde(flatten)]
    pub billing: BillingDetails,

    /// Minor units, as charged
    pub amount: i64,

    pub currency: Currency,

    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// `sequence` counts invoices issued in the month of `created_at`, from 1
    pub fn issue(
        payment: &Payment,
        billing: BillingDetails,
        sequence: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            invoice_number: invoice_number(created_at, sequence),
            billing,
            amount: payment.amount,
            currency: payment.currency,
            created_at,
        }
    }
}

/// Month bucket used for invoice numbering
pub fn invoice_period(at: DateTime<Utc>) -> String {
    at.format("%Y%m").to_string()
}

pub fn invoice_number(at: DateTime<Utc>, sequence: u32) -> String {
    format!("TH-{}-{:04}", invoice_period(at), sequence)
}
