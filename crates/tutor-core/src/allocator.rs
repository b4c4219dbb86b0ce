//! # Booking Allocator
//!
//! Validates a requested (date, time, duration), reserves the slot and
//! creates a Pending booking. Also owns cancellation and the administrative
//! Completed / NoShow transitions.
//!
//! The availability check here gives a clean early rejection; the ledger's
//! atomic `reserve` is what actually prevents double booking when two
//! requests race past the check.

use crate::availability::AvailabilityResolver;
use crate::booking::{end_time_for, Booking, BookingRequest, BookingStatus, UserId};
use crate::clock::SharedClock;
use crate::error::{BookingError, BookingResult};
use crate::hooks::SharedHooks;
use crate::ledger::SharedLedger;
use crate::pricing::PricingEngine;
use crate::slot::{day_of_week, SlotCatalog};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct BookingAllocator {
    catalog: Arc<SlotCatalog>,
    ledger: SharedLedger,
    availability: AvailabilityResolver,
    pricing: PricingEngine,
    clock: SharedClock,
    hooks: SharedHooks,
}

impl BookingAllocator {
    pub fn new(
        catalog: Arc<SlotCatalog>,
        ledger: SharedLedger,
        pricing: PricingEngine,
        clock: SharedClock,
        hooks: SharedHooks,
    ) -> Self {
        let availability = AvailabilityResolver::new(catalog.clone(), ledger.clone());
        Self {
            catalog,
            ledger,
            availability,
            pricing,
            clock,
            hooks,
        }
    }

    pub fn availability(&self) -> &AvailabilityResolver {
        &self.availability
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    /// Reserve a slot and create a Pending booking
    #[instrument(
        skip(self, request),
        fields(student_id = request.student_id, date = %request.date)
    )]
    pub async fn create_booking(&self, request: BookingRequest) -> BookingResult<Booking> {
        let today = self.clock.today();
        if request.date < today {
            return Err(BookingError::InvalidDate(format!(
                "{} is in the past (today is {})",
                request.date, today
            )));
        }
        end_time_for(request.start_time, request.duration)?;

        let slot_unavailable = || BookingError::SlotUnavailable {
            date: request.date.to_string(),
            start_time: request.start_time.format("%H:%M").to_string(),
        };

        if self
            .catalog
            .active_slot_at(day_of_week(request.date), request.start_time)
            .is_none()
        {
            debug!("No active template slot at {}", request.start_time);
            return Err(slot_unavailable());
        }
        if !self
            .availability
            .is_available(request.date, request.start_time)
            .await?
        {
            return Err(slot_unavailable());
        }

        let price = self.pricing.price(request.session_type, request.duration);
        let booking = Booking::pending(request, price, self.clock.now())?;
        let booking = self.ledger.reserve(booking).await?;

        info!(
            "Reserved {} {} for student {} at {}",
            booking.date,
            booking.start_time.format("%H:%M"),
            booking.student_id,
            self.pricing.currency().display(booking.price)
        );
        self.hooks.on_booking_created(&booking);
        Ok(booking)
    }

    /// Student cancellation. Pending bookings can always be cancelled;
    /// Confirmed ones only before the session starts.
    #[instrument(skip(self))]
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        actor_id: UserId,
    ) -> BookingResult<Booking> {
        let booking = self.require_booking(booking_id).await?;
        if !booking.is_owned_by(actor_id) {
            return Err(BookingError::Forbidden { user_id: actor_id });
        }
        if booking.status == BookingStatus::Confirmed
            && !booking.is_upcoming(self.clock.now_naive())
        {
            warn!("Refusing to cancel booking {} after its start", booking.id);
            return Err(BookingError::invalid_booking_transition(
                booking.status,
                BookingStatus::Cancelled,
            ));
        }

        let cancelled = self
            .ledger
            .transition_booking(booking_id, BookingStatus::Cancelled, self.clock.now())
            .await?;
        info!("Cancelled booking {}", cancelled.id);
        self.hooks.on_booking_cancelled(&cancelled);
        Ok(cancelled)
    }

    /// Administrative: Confirmed -> Completed
    #[instrument(skip(self))]
    pub async fn mark_completed(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.ledger
            .transition_booking(booking_id, BookingStatus::Completed, self.clock.now())
            .await
    }

    /// Administrative: Confirmed -> NoShow
    #[instrument(skip(self))]
    pub async fn mark_no_show(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.ledger
            .transition_booking(booking_id, BookingStatus::NoShow, self.clock.now())
            .await
    }

    pub async fn booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.require_booking(booking_id).await
    }

    /// A student's bookings, newest first, optionally filtered by status
    pub async fn bookings_for_student(
        &self,
        student_id: UserId,
        status: Option<BookingStatus>,
    ) -> BookingResult<Vec<Booking>> {
        let bookings = self.ledger.bookings_for_student(student_id).await?;
        Ok(match status {
            Some(status) => bookings.into_iter().filter(|b| b.status == status).collect(),
            None => bookings,
        })
    }

    async fn require_booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.ledger
            .booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound { booking_id })
    }
}
