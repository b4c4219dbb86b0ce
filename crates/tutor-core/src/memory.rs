//! In-memory ledger.
//!
//! All state sits behind one `tokio::sync::Mutex`, so every ledger call is a
//! serialized critical section. Reservation and the completion cascade are
//! validated fully before anything is written.

use crate::booking::{Booking, BookingStatus, UserId};
use crate::error::{BookingError, BookingResult};
use crate::ledger::{BookingLedger, Completion, FailOutcome, OpenPayment};
use crate::payment::{invoice_period, BillingDetails, Invoice, Payment, PaymentStatus, Refund};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, Payment>,
    checkout_index: HashMap<String, Uuid>,
    refunds: Vec<Refund>,
    /// Keyed by payment id
    invoices: HashMap<Uuid, Invoice>,
    /// Invoices issued per `YYYYMM`
    invoice_sequence: HashMap<String, u32>,
}

impl LedgerState {
    fn payment_mut(&mut self, id: Uuid) -> BookingResult<&mut Payment> {
        self.payments
            .get_mut(&id)
            .ok_or(BookingError::PaymentNotFound { payment_id: id })
    }

    fn refunded_total(&self, payment_id: Uuid) -> i64 {
        self.refunds
            .iter()
            .filter(|r| r.payment_id == payment_id)
            .map(|r| r.amount)
            .sum()
    }
}

/// A thread-safe in-memory ledger.
///
/// Cloning shares the underlying state.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates a new, empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingLedger for InMemoryLedger {
    async fn live_start_times(&self, date: NaiveDate) -> BookingResult<Vec<NaiveTime>> {
        let state = self.state.lock().await;
        Ok(state
            .bookings
            .values()
            .filter(|b| b.date == date && b.is_live())
            .map(|b| b.start_time)
            .collect())
    }

    async fn reserve(&self, booking: Booking) -> BookingResult<Booking> {
        let mut state = self.state.lock().await;
        let taken = state.bookings.values().any(|b| {
            b.is_live() && b.date == booking.date && b.start_time == booking.start_time
        });
        if taken {
            return Err(BookingError::SlotUnavailable {
                date: booking.date.to_string(),
                start_time: booking.start_time.format("%H:%M").to_string(),
            });
        }
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn booking(&self, id: Uuid) -> BookingResult<Option<Booking>> {
        let state = self.state.lock().await;
        Ok(state.bookings.get(&id).cloned())
    }

    async fn bookings_for_student(&self, student_id: UserId) -> BookingResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.student_id == student_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.starts_at().cmp(&a.starts_at()));
        Ok(bookings)
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> BookingResult<Booking> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or(BookingError::BookingNotFound { booking_id: id })?;
        if !booking.status.can_transition_to(to) {
            return Err(BookingError::invalid_booking_transition(booking.status, to));
        }
        booking.status = to;
        booking.updated_at = at;
        Ok(booking.clone())
    }

    async fn open_payment(&self, candidate: Payment) -> BookingResult<OpenPayment> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get(&candidate.booking_id)
            .ok_or(BookingError::BookingNotFound {
                booking_id: candidate.booking_id,
            })?;

        let attempts: Vec<&Payment> = state
            .payments
            .values()
            .filter(|p| p.booking_id == candidate.booking_id)
            .collect();

        if attempts.iter().any(|p| p.status.is_paid()) {
            return Err(BookingError::AlreadyPaid {
                booking_id: candidate.booking_id,
            });
        }
        if booking.status != BookingStatus::Pending {
            return Err(BookingError::invalid_booking_transition(
                booking.status,
                BookingStatus::Confirmed,
            ));
        }
        if let Some(active) = attempts.iter().find(|p| p.is_active()) {
            return Ok(OpenPayment::Existing((*active).clone()));
        }
        if candidate.amount != booking.price {
            return Err(BookingError::ConsistencyError(format!(
                "payment amount {} differs from booking price {}",
                candidate.amount, booking.price
            )));
        }

        state.payments.insert(candidate.id, candidate.clone());
        Ok(OpenPayment::Created(candidate))
    }

    async fn payment(&self, id: Uuid) -> BookingResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.get(&id).cloned())
    }

    async fn payment_by_checkout(&self, checkout_id: &str) -> BookingResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .checkout_index
            .get(checkout_id)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn payments_for_booking(&self, booking_id: Uuid) -> BookingResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn attach_checkout(
        &self,
        payment_id: Uuid,
        checkout_id: String,
        checkout_url: Option<String>,
        at: DateTime<Utc>,
    ) -> BookingResult<Payment> {
        let mut state = self.state.lock().await;
        let payment = state.payment_mut(payment_id)?;
        if payment.external_checkout_id.is_some() {
            return Ok(payment.clone());
        }
        if !payment.status.can_transition_to(PaymentStatus::Processing) {
            return Err(BookingError::invalid_payment_transition(
                payment.status,
                PaymentStatus::Processing,
            ));
        }
        payment.status = PaymentStatus::Processing;
        payment.external_checkout_id = Some(checkout_id.clone());
        payment.checkout_url = checkout_url;
        payment.updated_at = at;
        let updated = payment.clone();
        state.checkout_index.insert(checkout_id, payment_id);
        Ok(updated)
    }

    async fn fail_payment(
        &self,
        payment_id: Uuid,
        at: DateTime<Utc>,
    ) -> BookingResult<FailOutcome> {
        let mut state = self.state.lock().await;
        let payment = state.payment_mut(payment_id)?;
        if payment.status == PaymentStatus::Failed {
            return Ok(FailOutcome::Unchanged(payment.clone()));
        }
        if !payment.status.can_transition_to(PaymentStatus::Failed) {
            return Err(BookingError::invalid_payment_transition(
                payment.status,
                PaymentStatus::Failed,
            ));
        }
        payment.status = PaymentStatus::Failed;
        payment.updated_at = at;
        Ok(FailOutcome::Applied(payment.clone()))
    }

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        transaction_id: Option<String>,
        at: DateTime<Utc>,
    ) -> BookingResult<Completion> {
        let mut state = self.state.lock().await;

        let payment = state
            .payments
            .get(&payment_id)
            .ok_or(BookingError::PaymentNotFound { payment_id })?;
        if payment.status.is_paid() {
            return Ok(Completion::AlreadyCompleted(payment.clone()));
        }
        // The processor is authoritative about captured money: an attempt we
        // already marked Failed still records the capture.
        if !payment.is_active() && payment.status != PaymentStatus::Failed {
            return Err(BookingError::invalid_payment_transition(
                payment.status,
                PaymentStatus::Completed,
            ));
        }

        let booking_id = payment.booking_id;
        let booking_status = state
            .bookings
            .get(&booking_id)
            .map(|b| b.status)
            .ok_or_else(|| {
                BookingError::ConsistencyError(format!(
                    "payment {} references missing booking {}",
                    payment_id, booking_id
                ))
            })?;

        if booking_status != BookingStatus::Pending {
            let payment = state.payment_mut(payment_id)?;
            record_capture(payment, transaction_id, at);
            return Ok(Completion::LateCapture(payment.clone()));
        }

        // Both records validated; apply together.
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| BookingError::Internal("booking vanished under lock".to_string()))?;
        booking.status = BookingStatus::Confirmed;
        booking.updated_at = at;
        let booking = booking.clone();

        let payment = state.payment_mut(payment_id)?;
        record_capture(payment, transaction_id, at);
        let payment = payment.clone();

        Ok(Completion::Applied { payment, booking })
    }

    async fn record_refund(&self, refund: Refund, at: DateTime<Utc>) -> BookingResult<Payment> {
        let mut state = self.state.lock().await;
        let refunded = state.refunded_total(refund.payment_id);
        let payment = state.payment_mut(refund.payment_id)?;

        if payment.status != PaymentStatus::Completed {
            return Err(BookingError::invalid_payment_transition(
                payment.status,
                PaymentStatus::Refunded,
            ));
        }
        let remaining = payment.amount - refunded;
        if refund.amount <= 0 || refund.amount > remaining {
            return Err(BookingError::InvalidRefund(format!(
                "refund of {} exceeds refundable amount {}",
                refund.amount, remaining
            )));
        }

        payment.status = if refund.amount == remaining {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        payment.updated_at = at;
        let updated = payment.clone();
        state.refunds.push(refund);
        Ok(updated)
    }

    async fn refunds_for(&self, payment_id: Uuid) -> BookingResult<Vec<Refund>> {
        let state = self.state.lock().await;
        Ok(state
            .refunds
            .iter()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn invoice(&self, payment_id: Uuid) -> BookingResult<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state.invoices.get(&payment_id).cloned())
    }

    async fn issue_invoice(
        &self,
        payment_id: Uuid,
        billing: BillingDetails,
        at: DateTime<Utc>,
    ) -> BookingResult<Invoice> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.invoices.get(&payment_id) {
            return Ok(existing.clone());
        }

        let payment = state
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(BookingError::PaymentNotFound { payment_id })?;
        if !payment.status.is_paid() {
            return Err(BookingError::invalid_payment_transition(
                payment.status,
                "invoiced",
            ));
        }

        let sequence = state.invoice_sequence.entry(invoice_period(at)).or_insert(0);
        *sequence += 1;
        let invoice = Invoice::issue(&payment, billing, *sequence, at);
        state.invoices.insert(payment_id, invoice.clone());
        Ok(invoice)
    }
}

fn record_capture(payment: &mut Payment, transaction_id: Option<String>, at: DateTime<Utc>) {
    payment.status = PaymentStatus::Completed;
    payment.paid_at = Some(at);
    payment.updated_at = at;
    if transaction_id.is_some() {
        payment.external_transaction_id = transaction_id;
    }
}
