//! # Lifecycle Hooks
//!
//! Fire-and-forget side effects of state transitions (confirmation emails,
//! calendar invites, tutor notifications). Hooks run only when a transition
//! is actually applied, so duplicate webhooks never trigger them twice.
//! Hook failures are the implementor's concern; they cannot fail a transition.

use crate::booking::Booking;
use crate::payment::{Payment, Refund};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Transition observer
///
/// Implement the methods you care about; the defaults just log.
#[allow(unused_variables)]
pub trait LifecycleHooks: Send + Sync {
    /// A slot was reserved
    fn on_booking_created(&self, booking: &Booking) {
        info!(
            "Booking created: id={}, date={}, start={}, price={}",
            booking.id,
            booking.date,
            booking.start_time.format("%H:%M"),
            booking.price
        );
    }

    /// Payment completed and the booking is now Confirmed
    fn on_booking_confirmed(&self, booking: &Booking, payment: &Payment) {
        info!(
            "Booking confirmed: id={}, payment={}, amount={}",
            booking.id,
            payment.id,
            payment.amount_display()
        );
    }

    fn on_booking_cancelled(&self, booking: &Booking) {
        info!("Booking cancelled: id={}", booking.id);
    }

    /// A payment attempt failed; the booking stays Pending
    fn on_payment_failed(&self, payment: &Payment) {
        warn!(
            "Payment failed: id={}, booking={}",
            payment.id, payment.booking_id
        );
    }

    fn on_refund_issued(&self, payment: &Payment, refund: &Refund) {
        info!(
            "Refund issued: payment={}, amount={}, status={}",
            payment.id, refund.amount, payment.status
        );
    }

    /// Money arrived for a booking that no longer needed it. Without a
    /// refund the capture has to be reconciled by hand.
    fn on_late_capture(&self, payment: &Payment, refund: Option<&Refund>) {
        match refund {
            Some(refund) => warn!(
                "Late capture refunded: payment={}, booking={}, amount={}",
                payment.id, payment.booking_id, refund.amount
            ),
            None => error!(
                "Late capture needs manual reconciliation: payment={}, booking={}, txn={:?}",
                payment.id, payment.booking_id, payment.external_transaction_id
            ),
        }
    }
}

/// Default hooks (just log transitions)
pub struct LoggingHooks;

impl LifecycleHooks for LoggingHooks {}

pub type SharedHooks = Arc<dyn LifecycleHooks>;
