//! # Booking Ledger
//!
//! Storage port for bookings, payments and refunds.
//!
//! Every method is one atomic step against the store. The two operations
//! that carry the engine's invariants are:
//!
//! - [`BookingLedger::reserve`]: check that no live booking holds the exact
//!   (date, start time) and insert, as a single unit.
//! - [`BookingLedger::complete_payment`]: mark the payment Completed and the
//!   booking Confirmed together, or change neither. A capture that arrives
//!   after the booking left Pending is recorded on the payment alone
//!   ([`Completion::LateCapture`]) so the money can be returned.
//!
//! Implementations must never hold their critical section across an
//! external processor call; callers do processor I/O between ledger calls.

use crate::booking::{Booking, BookingStatus, UserId};
use crate::error::BookingResult;
use crate::payment::{BillingDetails, Invoice, Payment, Refund};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Result of looking up or creating the active payment for a booking
#[derive(Debug, Clone)]
pub enum OpenPayment {
    /// No active attempt existed; the candidate was stored
    Created(Payment),
    /// An active attempt already existed and is reused
    Existing(Payment),
}

impl OpenPayment {
    pub fn payment(&self) -> &Payment {
        match self {
            OpenPayment::Created(p) | OpenPayment::Existing(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            OpenPayment::Created(p) | OpenPayment::Existing(p) => p,
        }
    }
}

/// Result of the payment-completed cascade
#[derive(Debug, Clone)]
pub enum Completion {
    /// Payment Completed and booking Confirmed in this call
    Applied { payment: Payment, booking: Booking },
    /// The payment had already been settled by an earlier writer
    AlreadyCompleted(Payment),
    /// Money was captured but the booking is no longer Pending (cancelled,
    /// or confirmed by another attempt). The payment is Completed and the
    /// booking untouched; the capture needs a refund or manual review.
    LateCapture(Payment),
}

/// Result of marking a payment Failed
#[derive(Debug, Clone)]
pub enum FailOutcome {
    Applied(Payment),
    /// Already Failed
    Unchanged(Payment),
}

#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Start times of live (Pending/Confirmed) bookings on `date`
    async fn live_start_times(&self, date: NaiveDate) -> BookingResult<Vec<NaiveTime>>;

    /// Insert `booking` unless a live booking already holds its (date, start time).
    /// Fails with `SlotUnavailable`.
    async fn reserve(&self, booking: Booking) -> BookingResult<Booking>;

    async fn booking(&self, id: Uuid) -> BookingResult<Option<Booking>>;

    /// Newest first
    async fn bookings_for_student(&self, student_id: UserId) -> BookingResult<Vec<Booking>>;

    /// Apply a booking state-machine edge. Fails with `InvalidTransition`.
    async fn transition_booking(
        &self,
        id: Uuid,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> BookingResult<Booking>;

    /// Return the booking's active payment, or store `candidate` if there is none.
    /// Fails with `AlreadyPaid` once a payment has completed, and with
    /// `InvalidTransition` when the booking is no longer Pending.
    async fn open_payment(&self, candidate: Payment) -> BookingResult<OpenPayment>;

    async fn payment(&self, id: Uuid) -> BookingResult<Option<Payment>>;

    async fn payment_by_checkout(&self, checkout_id: &str) -> BookingResult<Option<Payment>>;

    /// Oldest first
    async fn payments_for_booking(&self, booking_id: Uuid) -> BookingResult<Vec<Payment>>;

    /// Record the processor checkout and move Pending -> Processing.
    /// A checkout already on record is kept and returned unchanged.
    async fn attach_checkout(
        &self,
        payment_id: Uuid,
        checkout_id: String,
        checkout_url: Option<String>,
        at: DateTime<Utc>,
    ) -> BookingResult<Payment>;

    /// Move an active payment to Failed. The booking is left untouched.
    async fn fail_payment(
        &self,
        payment_id: Uuid,
        at: DateTime<Utc>,
    ) -> BookingResult<FailOutcome>;

    /// Payment -> Completed and booking -> Confirmed as one unit.
    ///
    /// A Failed attempt whose booking is still Pending is recovered the same
    /// way. When the booking has moved on, the capture is recorded on the
    /// payment only and `LateCapture` is returned.
    async fn complete_payment(
        &self,
        payment_id: Uuid,
        transaction_id: Option<String>,
        at: DateTime<Utc>,
    ) -> BookingResult<Completion>;

    /// Append a refund and move the payment to Refunded / PartiallyRefunded
    async fn record_refund(&self, refund: Refund, at: DateTime<Utc>) -> BookingResult<Payment>;

    async fn refunds_for(&self, payment_id: Uuid) -> BookingResult<Vec<Refund>>;

    async fn invoice(&self, payment_id: Uuid) -> BookingResult<Option<Invoice>>;

    /// Return the payment's invoice, issuing the next number for the month if
    /// there is none yet. Only paid payments can be invoiced.
    async fn issue_invoice(
        &self,
        payment_id: Uuid,
        billing: BillingDetails,
        at: DateTime<Utc>,
    ) -> BookingResult<Invoice>;
}

/// Type alias for a shared ledger (dynamic dispatch)
pub type SharedLedger = Arc<dyn BookingLedger>;
