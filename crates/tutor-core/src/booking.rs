//! # Booking Types
//!
//! A booking reserves one exact (date, start time) for a student.

use crate::error::{BookingError, BookingResult};
use crate::pricing::{SessionLength, SessionType};
use crate::slot::hhmm;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External user identifier (students, admins)
pub type UserId = u64;

/// Booking lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Reserved, awaiting payment
    Pending,
    /// Paid
    Confirmed,
    /// Session took place
    Completed,
    /// Cancelled by the student
    Cancelled,
    /// Student did not attend
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    /// Live bookings hold their slot
    pub fn is_live(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    /// Edges of the booking state machine. Time-dependent guards
    /// (cancel only before the session starts) are checked by the allocator.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, NoShow)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "no_show" => Ok(BookingStatus::NoShow),
            other => Err(BookingError::InvalidRequest(format!(
                "unknown booking status '{}'",
                other
            ))),
        }
    }
}

/// How the session is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Online,
    #[serde(alias = "face_to_face")]
    InPerson,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Online
    }
}

/// Inbound request to reserve a slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub student_id: UserId,

    pub date: NaiveDate,

    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,

    #[serde(rename = "duration_hours")]
    pub duration: SessionLength,

    pub session_type: SessionType,

    #[serde(default)]
    pub delivery_mode: DeliveryMode,

    /// Course reference from the external catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A reservation of one exact slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,

    pub student_id: UserId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_ref: Option<String>,

    pub date: NaiveDate,

    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,

    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,

    #[serde(rename = "duration_hours")]
    pub duration: SessionLength,

    pub session_type: SessionType,

    pub delivery_mode: DeliveryMode,

    /// Price in minor units, fixed at creation
    pub price: i64,

    pub status: BookingStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Build a Pending booking. `end_time` is derived from the duration;
    /// sessions that would cross midnight are rejected.
    pub fn pending(request: BookingRequest, price: i64, now: DateTime<Utc>) -> BookingResult<Self> {
        let end_time = end_time_for(request.start_time, request.duration)?;
        Ok(Self {
            id: Uuid::new_v4(),
            student_id: request.student_id,
            course_ref: request.course_ref,
            date: request.date,
            start_time: request.start_time,
            end_time,
            duration: request.duration,
            session_type: request.session_type,
            delivery_mode: request.delivery_mode,
            price,
            status: BookingStatus::Pending,
            notes: request.notes,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// Whether the session start is still ahead of `now`
    pub fn is_upcoming(&self, now: NaiveDateTime) -> bool {
        self.starts_at() > now
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.student_id == user_id
    }
}

/// `start + duration`, refusing to wrap past midnight
pub fn end_time_for(start: NaiveTime, duration: SessionLength) -> BookingResult<NaiveTime> {
    let (end, wrapped_secs) = start.overflowing_add_signed(duration.as_duration());
    if wrapped_secs != 0 {
        return Err(BookingError::InvalidDuration(format!(
            "a {} session starting at {} runs past midnight",
            duration,
            start.format("%H:%M")
        )));
    }
    Ok(end)
}
