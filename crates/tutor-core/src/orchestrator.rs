//! # Payment Orchestrator
//!
//! Creates and tracks payment attempts for a booking, talks to the
//! processor, and applies payment/booking transitions as outcomes arrive
//! from the return URL, the cancel URL or the webhook.
//!
//! Settlement of a given payment is serialized through a per-payment lock;
//! the ledger additionally checks the current status before every write, so
//! a direct confirmation racing a webhook resolves to one `Confirmed` and
//! one `AlreadyConfirmed`.
//!
//! Money captured after its booking left Pending (the student cancelled
//! while the hosted checkout was still open, or a second attempt also went
//! through) is recorded and refunded rather than rejected, so the processor
//! always gets an acknowledgement.

use crate::booking::{Booking, BookingStatus, UserId};
use crate::clock::SharedClock;
use crate::error::{BookingError, BookingResult};
use crate::hooks::SharedHooks;
use crate::ledger::{Completion, FailOutcome, OpenPayment, SharedLedger};
use crate::payment::{BillingDetails, Invoice, Payment, PaymentStatus, Refund};
use crate::pricing::Currency;
use crate::processor::{
    CheckoutHandle, CheckoutRequest, CheckoutUrls, ProcessorStatus, SharedProcessor,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Payment settings injected at construction time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    pub currency: Currency,
    /// Upper bound for every processor call
    pub processor_timeout: Duration,
    /// Refund completed payments when their booking is cancelled
    pub refund_on_cancel: bool,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            currency: Currency::GBP,
            processor_timeout: Duration::from_secs(30),
            refund_on_cancel: true,
        }
    }
}

/// Outcome of applying a processor status to a payment
#[derive(Debug, Clone)]
pub enum Settlement {
    /// Payment Completed and booking Confirmed by this call
    Confirmed { payment: Payment, booking: Booking },
    /// Another writer completed the payment first
    AlreadyConfirmed(Payment),
    /// Payment moved to Failed by this call; booking stays Pending
    Failed(Payment),
    AlreadyFailed(Payment),
    /// Processor had nothing conclusive, or the report was stale
    Unchanged(Payment),
    /// Money captured for a booking that is no longer awaiting payment.
    /// `refund` is `None` when the capture still needs manual reconciliation.
    LateCapture {
        payment: Payment,
        refund: Option<Refund>,
    },
}

impl Settlement {
    pub fn payment(&self) -> &Payment {
        match self {
            Settlement::Confirmed { payment, .. }
            | Settlement::AlreadyConfirmed(payment)
            | Settlement::Failed(payment)
            | Settlement::AlreadyFailed(payment)
            | Settlement::Unchanged(payment)
            | Settlement::LateCapture { payment, .. } => payment,
        }
    }
}

type PaymentLocks = Arc<std::sync::Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>;

/// Holds a payment's lock; the map entry goes away with the last holder
struct PaymentGuard {
    payment_id: Uuid,
    locks: PaymentLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PaymentGuard {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means only the map is left
        if locks
            .get(&self.payment_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.payment_id);
        }
    }
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    ledger: SharedLedger,
    processor: SharedProcessor,
    urls: CheckoutUrls,
    settings: PaymentSettings,
    clock: SharedClock,
    hooks: SharedHooks,
    locks: PaymentLocks,
}

impl PaymentOrchestrator {
    pub fn new(
        ledger: SharedLedger,
        processor: SharedProcessor,
        urls: CheckoutUrls,
        settings: PaymentSettings,
        clock: SharedClock,
        hooks: SharedHooks,
    ) -> Self {
        Self {
            ledger,
            processor,
            urls,
            settings,
            clock,
            hooks,
            locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &PaymentSettings {
        &self.settings
    }

    pub fn provider_name(&self) -> &'static str {
        self.processor.provider_name()
    }

    /// Return the booking's active payment, or open a new one for its price.
    /// Repeated calls (page refresh, client retry) get the same payment.
    #[instrument(skip(self))]
    pub async fn initiate_payment(
        &self,
        booking_id: Uuid,
        user_id: UserId,
    ) -> BookingResult<Payment> {
        let booking = self
            .ledger
            .booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound { booking_id })?;
        if !booking.is_owned_by(user_id) {
            return Err(BookingError::Forbidden { user_id });
        }

        let candidate =
            Payment::for_booking(&booking, user_id, self.settings.currency, self.clock.now());
        match self.ledger.open_payment(candidate).await? {
            OpenPayment::Created(payment) => {
                info!(
                    "Opened payment {} for booking {} ({})",
                    payment.id,
                    booking.id,
                    payment.amount_display()
                );
                Ok(payment)
            }
            OpenPayment::Existing(payment) => {
                info!(
                    "Reusing active payment {} for booking {}",
                    payment.id, booking.id
                );
                Ok(payment)
            }
        }
    }

    /// Obtain a processor checkout for the payment and move it to Processing.
    ///
    /// A checkout already on record is returned without a new processor call,
    /// so retries after a lost response never open a second checkout.
    #[instrument(skip(self))]
    pub async fn begin_checkout(&self, payment_id: Uuid) -> BookingResult<CheckoutHandle> {
        let _guard = self.lock_payment(payment_id).await;

        let payment = self.require_payment(payment_id).await?;
        if let Some(checkout_id) = &payment.external_checkout_id {
            return Ok(CheckoutHandle {
                checkout_id: checkout_id.clone(),
                checkout_url: payment.checkout_url.clone(),
            });
        }
        if payment.status != PaymentStatus::Pending {
            return Err(BookingError::invalid_payment_transition(
                payment.status,
                PaymentStatus::Processing,
            ));
        }
        let booking = self.require_booking(payment.booking_id).await?;
        if booking.status != BookingStatus::Pending {
            return Err(BookingError::invalid_booking_transition(
                booking.status,
                BookingStatus::Confirmed,
            ));
        }

        let request = CheckoutRequest {
            reference: payment.checkout_reference(),
            payment_id: payment.id,
            amount: payment.amount,
            currency: payment.currency,
            description: payment.description.clone(),
            success_url: self.urls.success_url(payment.id),
            cancel_url: self.urls.cancel_url(payment.id),
        };

        let handle = self
            .call_processor("create_checkout", self.processor.create_checkout(&request))
            .await?;

        let recorded = self
            .ledger
            .attach_checkout(
                payment.id,
                handle.checkout_id.clone(),
                handle.checkout_url.clone(),
                self.clock.now(),
            )
            .await?;

        if recorded.external_checkout_id.as_deref() != Some(handle.checkout_id.as_str()) {
            warn!(
                "Payment {} already had checkout {:?}; discarding {}",
                payment.id, recorded.external_checkout_id, handle.checkout_id
            );
        }
        info!(
            "Checkout {:?} opened with {} for payment {}",
            recorded.external_checkout_id,
            self.processor.provider_name(),
            payment.id
        );

        Ok(CheckoutHandle {
            checkout_id: recorded
                .external_checkout_id
                .clone()
                .unwrap_or(handle.checkout_id),
            checkout_url: recorded.checkout_url,
        })
    }

    /// Apply a processor outcome to the payment (and, on success, the booking)
    #[instrument(skip(self, status))]
    pub async fn confirm_payment(
        &self,
        payment_id: Uuid,
        status: ProcessorStatus,
    ) -> BookingResult<Settlement> {
        let settlement = {
            let _guard = self.lock_payment(payment_id).await;
            self.apply_status(payment_id, status).await?
        };
        match settlement {
            Settlement::LateCapture { payment, .. } => self.resolve_late_capture(payment).await,
            other => Ok(other),
        }
    }

    async fn apply_status(
        &self,
        payment_id: Uuid,
        status: ProcessorStatus,
    ) -> BookingResult<Settlement> {
        let now = self.clock.now();
        match status {
            ProcessorStatus::Paid { transaction_id } => {
                match self.ledger.complete_payment(payment_id, transaction_id, now).await {
                    Ok(Completion::Applied { payment, booking }) => {
                        info!(
                            "Payment {} completed; booking {} confirmed",
                            payment.id, booking.id
                        );
                        self.hooks.on_booking_confirmed(&booking, &payment);
                        Ok(Settlement::Confirmed { payment, booking })
                    }
                    Ok(Completion::AlreadyCompleted(payment)) => {
                        info!("Payment {} already completed; nothing to apply", payment.id);
                        Ok(Settlement::AlreadyConfirmed(payment))
                    }
                    Ok(Completion::LateCapture(payment)) => {
                        warn!(
                            "Payment {} captured after booking {} stopped awaiting payment",
                            payment.id, payment.booking_id
                        );
                        Ok(Settlement::LateCapture {
                            payment,
                            refund: None,
                        })
                    }
                    Err(err) => {
                        error!(
                            "Payment {} reported paid but could not be applied: {}",
                            payment_id, err
                        );
                        Err(err)
                    }
                }
            }
            ProcessorStatus::Pending | ProcessorStatus::Unknown => {
                Ok(Settlement::Unchanged(self.require_payment(payment_id).await?))
            }
            ProcessorStatus::Failed => match self.ledger.fail_payment(payment_id, now).await {
                Ok(FailOutcome::Applied(payment)) => {
                    self.hooks.on_payment_failed(&payment);
                    Ok(Settlement::Failed(payment))
                }
                Ok(FailOutcome::Unchanged(payment)) => Ok(Settlement::AlreadyFailed(payment)),
                Err(BookingError::InvalidTransition { from, .. }) => {
                    warn!(
                        "Ignoring failure report for payment {} in state {}",
                        payment_id, from
                    );
                    Ok(Settlement::Unchanged(self.require_payment(payment_id).await?))
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Return a capture that no booking can use. Captures on cancelled
    /// bookings follow `refund_on_cancel`; duplicate captures are always
    /// returned. Anything not refunded is reported through the hooks.
    async fn resolve_late_capture(&self, payment: Payment) -> BookingResult<Settlement> {
        let booking = self.require_booking(payment.booking_id).await?;
        let refundable =
            booking.status != BookingStatus::Cancelled || self.settings.refund_on_cancel;
        if !refundable {
            self.hooks.on_late_capture(&payment, None);
            return Ok(Settlement::LateCapture {
                payment,
                refund: None,
            });
        }

        let reason = format!("Payment captured after booking was {}", booking.status);
        match self.refund_payment(payment.id, None, &reason).await {
            Ok((refunded, refund)) => {
                self.hooks.on_late_capture(&refunded, Some(&refund));
                Ok(Settlement::LateCapture {
                    payment: refunded,
                    refund: Some(refund),
                })
            }
            Err(BookingError::InvalidTransition { from, .. }) => {
                info!("Late capture {} already settled as {}", payment.id, from);
                Ok(Settlement::LateCapture {
                    payment: self.require_payment(payment.id).await?,
                    refund: None,
                })
            }
            Err(err) => {
                error!("Refund of late capture {} failed: {}", payment.id, err);
                let current = self.require_payment(payment.id).await?;
                self.hooks.on_late_capture(&current, None);
                Ok(Settlement::LateCapture {
                    payment: current,
                    refund: None,
                })
            }
        }
    }

    /// Return-URL path: ask the processor for the outcome and apply it
    #[instrument(skip(self))]
    pub async fn sync_with_processor(&self, payment_id: Uuid) -> BookingResult<Settlement> {
        let payment = self.require_payment(payment_id).await?;
        if payment.status.is_paid() {
            return Ok(Settlement::AlreadyConfirmed(payment));
        }
        let Some(checkout_id) = payment.external_checkout_id.clone() else {
            return Ok(Settlement::Unchanged(payment));
        };

        let status = self
            .call_processor("checkout_status", self.processor.checkout_status(&checkout_id))
            .await?;
        self.confirm_payment(payment_id, status).await
    }

    /// Cancel-URL path, or the student abandoning the attempt before checkout
    #[instrument(skip(self))]
    pub async fn cancel_payment(
        &self,
        payment_id: Uuid,
        user_id: UserId,
    ) -> BookingResult<Payment> {
        let payment = self.require_payment(payment_id).await?;
        if payment.user_id != user_id {
            return Err(BookingError::Forbidden { user_id });
        }

        let _guard = self.lock_payment(payment_id).await;
        // Settled payments stay as they are
        let current = self.require_payment(payment_id).await?;
        if !current.is_active() {
            return Ok(current);
        }
        match self.ledger.fail_payment(payment_id, self.clock.now()).await? {
            FailOutcome::Applied(payment) => {
                info!("Payment {} cancelled by user {}", payment.id, user_id);
                self.hooks.on_payment_failed(&payment);
                Ok(payment)
            }
            FailOutcome::Unchanged(payment) => Ok(payment),
        }
    }

    /// Refund a completed payment. `amount` defaults to the full amount.
    #[instrument(skip(self, reason))]
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        amount: Option<i64>,
        reason: &str,
    ) -> BookingResult<(Payment, Refund)> {
        let _guard = self.lock_payment(payment_id).await;

        let payment = self.require_payment(payment_id).await?;
        if payment.status != PaymentStatus::Completed {
            return Err(BookingError::invalid_payment_transition(
                payment.status,
                PaymentStatus::Refunded,
            ));
        }
        let amount = amount.unwrap_or(payment.amount);
        if amount <= 0 || amount > payment.amount {
            return Err(BookingError::InvalidRefund(format!(
                "refund of {} outside 1..={}",
                amount, payment.amount
            )));
        }
        let transaction_id = payment.external_transaction_id.clone().ok_or_else(|| {
            BookingError::InvalidRefund(format!("payment {} has no transaction id", payment.id))
        })?;

        let receipt = self
            .call_processor(
                "refund",
                self.processor.refund(&transaction_id, amount, payment.currency),
            )
            .await?;

        let now = self.clock.now();
        let refund = Refund::new(payment.id, amount, reason, Some(receipt.refund_id), now);
        let updated = self
            .ledger
            .record_refund(refund.clone(), now)
            .await
            .map_err(|err| {
                error!(
                    "Processor refunded payment {} but the refund could not be recorded: {}",
                    payment.id, err
                );
                err
            })?;

        self.hooks.on_refund_issued(&updated, &refund);
        Ok((updated, refund))
    }

    /// Follow-up for a cancelled booking: close open attempts and, when
    /// enabled, refund the completed payment in full.
    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    pub async fn settle_cancellation(&self, booking: &Booking) -> BookingResult<Option<Refund>> {
        let mut refund = None;
        for listed in self.ledger.payments_for_booking(booking.id).await? {
            let payment = if listed.is_active() {
                let _guard = self.lock_payment(listed.id).await;
                match self.ledger.fail_payment(listed.id, self.clock.now()).await {
                    Ok(FailOutcome::Applied(failed)) => {
                        self.hooks.on_payment_failed(&failed);
                        continue;
                    }
                    Ok(FailOutcome::Unchanged(_)) => continue,
                    // A capture landed after the listing
                    Err(BookingError::InvalidTransition { from, .. }) => {
                        info!("Payment {} settled as {} before cancellation", listed.id, from);
                        self.require_payment(listed.id).await?
                    }
                    Err(err) => return Err(err),
                }
            } else {
                listed
            };

            if payment.status != PaymentStatus::Completed || !self.settings.refund_on_cancel {
                continue;
            }
            match self.refund_payment(payment.id, None, "Booking cancelled").await {
                Ok((_, issued)) => refund = Some(issued),
                // Refunded meanwhile by the late-capture settlement
                Err(BookingError::InvalidTransition { from, .. }) => {
                    info!("Payment {} already {}; no cancellation refund", payment.id, from);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(refund)
    }

    /// Get or create the invoice for a paid payment. Billing details are
    /// needed only the first time; later calls return the stored invoice.
    #[instrument(skip(self, billing))]
    pub async fn invoice_for(
        &self,
        payment_id: Uuid,
        user_id: UserId,
        billing: Option<BillingDetails>,
    ) -> BookingResult<Invoice> {
        let payment = self.require_payment(payment_id).await?;
        if payment.user_id != user_id {
            return Err(BookingError::Forbidden { user_id });
        }
        if let Some(existing) = self.ledger.invoice(payment_id).await? {
            return Ok(existing);
        }
        if !payment.status.is_paid() {
            return Err(BookingError::invalid_payment_transition(
                payment.status,
                "invoiced",
            ));
        }

        let billing = billing.ok_or_else(|| {
            BookingError::InvalidRequest("billing details are required".to_string())
        })?;
        billing.validate()?;

        let invoice = self
            .ledger
            .issue_invoice(payment_id, billing, self.clock.now())
            .await?;
        info!("Invoice {} for payment {}", invoice.invoice_number, payment_id);
        Ok(invoice)
    }

    /// Look up the payment behind a processor checkout id
    pub async fn payment_for_checkout(&self, checkout_id: &str) -> BookingResult<Payment> {
        self.ledger
            .payment_by_checkout(checkout_id)
            .await?
            .ok_or_else(|| BookingError::UnknownPayment {
                checkout_id: checkout_id.to_string(),
            })
    }

    pub async fn payment(&self, payment_id: Uuid) -> BookingResult<Payment> {
        self.require_payment(payment_id).await
    }

    pub async fn payments_for_booking(&self, booking_id: Uuid) -> BookingResult<Vec<Payment>> {
        self.ledger.payments_for_booking(booking_id).await
    }

    pub async fn refunds_for(&self, payment_id: Uuid) -> BookingResult<Vec<Refund>> {
        self.ledger.refunds_for(payment_id).await
    }

    async fn call_processor<T, F>(&self, operation: &str, call: F) -> BookingResult<T>
    where
        F: Future<Output = BookingResult<T>>,
    {
        match tokio::time::timeout(self.settings.processor_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                error!("{} failed at {}: {}", operation, self.processor.provider_name(), err);
                Err(err)
            }
            Err(_) => {
                error!(
                    "{} timed out at {} after {:?}",
                    operation,
                    self.processor.provider_name(),
                    self.settings.processor_timeout
                );
                Err(BookingError::ProcessorUnavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.settings.processor_timeout
                )))
            }
        }
    }

    async fn lock_payment(&self, payment_id: Uuid) -> PaymentGuard {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(payment_id).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        PaymentGuard {
            payment_id,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn require_payment(&self, payment_id: Uuid) -> BookingResult<Payment> {
        self.ledger
            .payment(payment_id)
            .await?
            .ok_or(BookingError::PaymentNotFound { payment_id })
    }

    async fn require_booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.ledger
            .booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound { booking_id })
    }
}
