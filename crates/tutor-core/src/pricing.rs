//! # Pricing Engine
//!
//! Session pricing for tuition bookings.
//! Rates are loaded from the `[pricing]` table of `config/tutoring.toml` and
//! are expressed in minor currency units per hour.

use crate::error::BookingError;
use serde::{Deserialize, Serialize};

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    GBP,
    EUR,
    USD,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::GBP => "gbp",
            Currency::EUR => "eur",
            Currency::USD => "usd",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Currency::GBP => "£",
            Currency::EUR => "€",
            Currency::USD => "$",
        }
    }

    /// Convert from minor units to a decimal amount (processors that take majors)
    pub fn to_major(&self, minor: i64) -> f64 {
        minor as f64 / 100.0
    }

    /// Format an amount in minor units for display (e.g., "£60.00")
    pub fn display(&self, minor: i64) -> String {
        format!("{}{}.{:02}", self.symbol(), minor / 100, (minor % 100).abs())
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::GBP
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Group size of a session. Each type has its own hourly rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[serde(alias = "one_to_one")]
    Solo,
    #[serde(alias = "two_students")]
    Pair,
    #[serde(alias = "three_students")]
    Triple,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Solo => "solo",
            SessionType::Pair => "pair",
            SessionType::Triple => "triple",
        }
    }
}

/// Offered session lengths. Stored as half-hours so pricing stays integral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum SessionLength {
    OneHour,
    NinetyMinutes,
    TwoHours,
}

impl SessionLength {
    pub const ALL: [SessionLength; 3] = [
        SessionLength::OneHour,
        SessionLength::NinetyMinutes,
        SessionLength::TwoHours,
    ];

    pub fn half_hours(&self) -> i64 {
        match self {
            SessionLength::OneHour => 2,
            SessionLength::NinetyMinutes => 3,
            SessionLength::TwoHours => 4,
        }
    }

    pub fn minutes(&self) -> i64 {
        self.half_hours() * 30
    }

    pub fn hours(&self) -> f64 {
        self.half_hours() as f64 / 2.0
    }

    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes())
    }

    /// Parse a duration in hours. Only 1.0, 1.5 and 2.0 are offered.
    pub fn from_hours(hours: f64) -> Result<Self, BookingError> {
        let half_hours = hours * 2.0;
        if half_hours.fract() != 0.0 {
            return Err(BookingError::InvalidDuration(format!(
                "{} hours is not an offered session length",
                hours
            )));
        }
        match half_hours as i64 {
            2 => Ok(SessionLength::OneHour),
            3 => Ok(SessionLength::NinetyMinutes),
            4 => Ok(SessionLength::TwoHours),
            _ => Err(BookingError::InvalidDuration(format!(
                "{} hours is not an offered session length",
                hours
            ))),
        }
    }
}

impl TryFrom<f64> for SessionLength {
    type Error = BookingError;

    fn try_from(hours: f64) -> Result<Self, Self::Error> {
        SessionLength::from_hours(hours)
    }
}

impl From<SessionLength> for f64 {
    fn from(length: SessionLength) -> Self {
        length.hours()
    }
}

impl std::fmt::Display for SessionLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}h", self.hours())
    }
}

/// Hourly rates in minor units, keyed by session type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    pub solo: i64,
    pub pair: i64,
    pub triple: i64,
}

impl RateTable {
    pub fn rate(&self, session_type: SessionType) -> i64 {
        match session_type {
            SessionType::Solo => self.solo,
            SessionType::Pair => self.pair,
            SessionType::Triple => self.triple,
        }
    }
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            solo: 6_000,
            pair: 10_000,
            triple: 12_000,
        }
    }
}

/// Pricing configuration injected at construction time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    pub rates: RateTable,
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), BookingError> {
        for session_type in [SessionType::Solo, SessionType::Pair, SessionType::Triple] {
            if self.rates.rate(session_type) <= 0 {
                return Err(BookingError::Configuration(format!(
                    "rate for {} must be positive",
                    session_type.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// Pure pricing function over a fixed rate table
#[derive(Debug, Clone)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn currency(&self) -> Currency {
        self.config.currency
    }

    pub fn rates(&self) -> &RateTable {
        &self.config.rates
    }

    /// Price of a session in minor units: `trunc(rate * hours)`
    pub fn price(&self, session_type: SessionType, length: SessionLength) -> i64 {
        self.config.rates.rate(session_type) * length.half_hours() / 2
    }
}
