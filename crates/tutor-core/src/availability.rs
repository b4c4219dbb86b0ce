//! # Availability Resolver
//!
//! Bookable slots for a concrete date: the weekly template for that weekday
//! minus every slot whose start time is held by a live booking on that date.
//! Recomputed on every call; booking state changes concurrently.

use crate::error::{BookingError, BookingResult};
use crate::ledger::SharedLedger;
use crate::slot::{day_of_week, hhmm, SlotCatalog};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// A bookable window on a concrete date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

/// Parse a `YYYY-MM-DD` query value
pub fn parse_date(raw: &str) -> BookingResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| BookingError::InvalidDate(format!("'{}' is not a YYYY-MM-DD date", raw)))
}

#[derive(Clone)]
pub struct AvailabilityResolver {
    catalog: Arc<SlotCatalog>,
    ledger: SharedLedger,
}

impl AvailabilityResolver {
    pub fn new(catalog: Arc<SlotCatalog>, ledger: SharedLedger) -> Self {
        Self { catalog, ledger }
    }

    /// Template order is preserved
    pub async fn available_slots(&self, date: NaiveDate) -> BookingResult<Vec<AvailableSlot>> {
        let template = self.catalog.slots_for(day_of_week(date));
        if template.is_empty() {
            return Ok(Vec::new());
        }

        let taken: HashSet<NaiveTime> = self
            .ledger
            .live_start_times(date)
            .await?
            .into_iter()
            .collect();

        Ok(template
            .into_iter()
            .filter(|slot| !taken.contains(&slot.start_time))
            .map(|slot| AvailableSlot {
                start_time: slot.start_time,
                end_time: slot.end_time,
            })
            .collect())
    }

    /// Whether `start_time` is currently bookable on `date`
    pub async fn is_available(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> BookingResult<bool> {
        Ok(self
            .available_slots(date)
            .await?
            .iter()
            .any(|slot| slot.start_time == start_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{Booking, BookingRequest, BookingStatus, DeliveryMode};
    use crate::ledger::BookingLedger;
    use crate::memory::InMemoryLedger;
    use crate::pricing::{SessionLength, SessionType};
    use chrono::Utc;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn booking(date: NaiveDate, hour: u32) -> Booking {
        Booking::pending(
            BookingRequest {
                student_id: 7,
                date,
                start_time: t(hour),
                duration: SessionLength::OneHour,
                session_type: SessionType::Solo,
                delivery_mode: DeliveryMode::Online,
                course_ref: None,
                notes: None,
            },
            6_000,
            Utc::now(),
        )
        .unwrap()
    }

    fn resolver(ledger: &InMemoryLedger) -> AvailabilityResolver {
        AvailabilityResolver::new(
            Arc::new(SlotCatalog::default_template()),
            Arc::new(ledger.clone()),
        )
    }

    #[tokio::test]
    async fn test_excludes_exactly_live_bookings() {
        let ledger = InMemoryLedger::new();
        ledger.reserve(booking(monday(), 16)).await.unwrap();
        let confirmed = ledger.reserve(booking(monday(), 18)).await.unwrap();
        ledger
            .transition_booking(confirmed.id, BookingStatus::Confirmed, Utc::now())
            .await
            .unwrap();
        let cancelled = ledger.reserve(booking(monday(), 20)).await.unwrap();
        ledger
            .transition_booking(cancelled.id, BookingStatus::Cancelled, Utc::now())
            .await
            .unwrap();
        // Another day does not interfere
        ledger
            .reserve(booking(monday().succ_opt().unwrap(), 17))
            .await
            .unwrap();

        let starts: Vec<NaiveTime> = resolver(&ledger)
            .available_slots(monday())
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.start_time)
            .collect();

        assert_eq!(starts, vec![t(17), t(19), t(20)]);
    }

    #[tokio::test]
    async fn test_all_slots_free_without_bookings() {
        let ledger = InMemoryLedger::new();
        let resolver = resolver(&ledger);
        // Saturday
        let saturday = NaiveDate::from_ymd_opt(2026, 10, 24).unwrap();
        let slots = resolver.available_slots(saturday).await.unwrap();
        assert_eq!(slots.len(), 9);
        assert_eq!(slots[0].start_time, t(9));
        assert_eq!(slots[0].end_time, t(10));
        assert!(resolver.is_available(saturday, t(12)).await.unwrap());
        assert!(!resolver.is_available(saturday, t(20)).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_day() {
        let ledger = InMemoryLedger::new();
        let resolver = AvailabilityResolver::new(Arc::new(SlotCatalog::new()), Arc::new(ledger));
        assert!(resolver.available_slots(monday()).await.unwrap().is_empty());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2026-10-19").unwrap(), monday());
        assert!(matches!(parse_date("19/10/2026"), Err(BookingError::InvalidDate(_))));
        assert!(parse_date("2026-02-30").is_err());
        assert!(parse_date("").is_err());
    }
}
