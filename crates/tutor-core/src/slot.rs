//! # Slot Catalog
//!
//! Weekly recurring availability template.
//! Slots are loaded from the `[[slots]]` array of `config/tutoring.toml`;
//! when no file is present the built-in evening/weekend template is used.

use crate::error::{BookingError, BookingResult};
use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// `HH:MM` (de)serialization for `NaiveTime`. Seconds are accepted on input.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid time '{}', expected HH:MM", raw))
        })
    }
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// Day index used by the template: 0 = Monday .. 6 = Sunday
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

fn default_capacity() -> u8 {
    3
}

fn default_true() -> bool {
    true
}

/// A weekly-recurring window during which a session may be booked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringSlot {
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u8,

    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,

    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,

    /// Maximum group size. Informational: allocation treats every slot as
    /// single-occupancy by exact start time.
    #[serde(default = "default_capacity")]
    pub capacity: u8,

    #[serde(default = "default_true")]
    pub active: bool,
}

impl RecurringSlot {
    pub fn new(day_of_week: u8, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            day_of_week,
            start_time,
            end_time,
            capacity: default_capacity(),
            active: true,
        }
    }

    /// Builder: set capacity
    pub fn with_capacity(mut self, capacity: u8) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder: mark inactive
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn validate(&self) -> BookingResult<()> {
        if self.day_of_week > 6 {
            return Err(BookingError::Configuration(format!(
                "day_of_week {} out of range 0..=6",
                self.day_of_week
            )));
        }
        if self.start_time >= self.end_time {
            return Err(BookingError::Configuration(format!(
                "slot {} {} must start before it ends",
                self.day_of_week,
                self.start_time.format("%H:%M")
            )));
        }
        if self.capacity == 0 {
            return Err(BookingError::Configuration(
                "slot capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The full weekly template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotCatalog {
    #[serde(default)]
    slots: Vec<RecurringSlot>,
}

impl SlotCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Build a catalog, rejecting invalid or duplicate slots
    pub fn from_slots(slots: Vec<RecurringSlot>) -> BookingResult<Self> {
        let mut catalog = Self::new();
        for slot in slots {
            slot.validate()?;
            if catalog.find(slot.day_of_week, slot.start_time).is_some() {
                return Err(BookingError::Configuration(format!(
                    "duplicate slot for day {} at {}",
                    slot.day_of_week,
                    slot.start_time.format("%H:%M")
                )));
            }
            catalog.slots.push(slot);
        }
        catalog.sort();
        Ok(catalog)
    }

    /// Weekday evenings 16:00-21:00, weekends 09:00-18:00, hourly, capacity 3
    pub fn default_template() -> Self {
        let mut slots = Vec::new();
        for day in 0..5u8 {
            for hour in 16..21u32 {
                slots.push(hourly_slot(day, hour));
            }
        }
        for day in [5u8, 6u8] {
            for hour in 9..18u32 {
                slots.push(hourly_slot(day, hour));
            }
        }
        let mut catalog = Self { slots };
        catalog.sort();
        catalog
    }

    /// Active slots for a weekday, ordered by start time
    pub fn slots_for(&self, day_of_week: u8) -> Vec<RecurringSlot> {
        self.slots
            .iter()
            .filter(|s| s.day_of_week == day_of_week && s.active)
            .cloned()
            .collect()
    }

    /// Active slot starting exactly at `start_time`
    pub fn active_slot_at(&self, day_of_week: u8, start_time: NaiveTime) -> Option<&RecurringSlot> {
        self.find(day_of_week, start_time).filter(|s| s.active)
    }

    /// Insert or replace the slot with the same (day, start)
    pub fn upsert(&mut self, slot: RecurringSlot) -> BookingResult<()> {
        slot.validate()?;
        match self
            .slots
            .iter_mut()
            .find(|s| s.day_of_week == slot.day_of_week && s.start_time == slot.start_time)
        {
            Some(existing) => *existing = slot,
            None => self.slots.push(slot),
        }
        self.sort();
        Ok(())
    }

    /// Slots are never removed, only switched off. Returns false if no such slot.
    pub fn deactivate(&mut self, day_of_week: u8, start_time: NaiveTime) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|s| s.day_of_week == day_of_week && s.start_time == start_time)
        {
            Some(slot) => {
                slot.active = false;
                true
            }
            None => false,
        }
    }

    pub fn all(&self) -> &[RecurringSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn find(&self, day_of_week: u8, start_time: NaiveTime) -> Option<&RecurringSlot> {
        self.slots
            .iter()
            .find(|s| s.day_of_week == day_of_week && s.start_time == start_time)
    }

    fn sort(&mut self) {
        self.slots
            .sort_by_key(|s| (s.day_of_week, s.start_time));
    }
}

fn hourly_slot(day: u8, hour: u32) -> RecurringSlot {
    RecurringSlot::new(
        day,
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default(),
        NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap_or_default(),
    )
}
