//! Tutoring configuration file (`tutoring.toml`).
//!
//! ```toml
//! currency = "gbp"
//!
//! [pricing]
//! solo = 6000
//! pair = 10000
//! triple = 12000
//!
//! [[slots]]
//! day_of_week = 0
//! start_time = "16:00"
//! end_time = "17:00"
//! ```
//!
//! Omitting `[[slots]]` entirely selects the default weekly template.

use crate::error::{BookingError, BookingResult};
use crate::pricing::{Currency, PricingConfig, RateTable};
use crate::slot::{RecurringSlot, SlotCatalog};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TutoringConfig {
    #[serde(default)]
    pub currency: Currency,

    /// Hourly rates in minor units
    #[serde(default)]
    pub pricing: RateTable,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<RecurringSlot>>,
}

impl TutoringConfig {
    pub fn from_toml(toml_str: &str) -> BookingResult<Self> {
        let config: TutoringConfig =
            toml::from_str(toml_str).map_err(|e| BookingError::Configuration(e.to_string()))?;
        config.pricing_config().validate()?;
        Ok(config)
    }

    pub fn pricing_config(&self) -> PricingConfig {
        PricingConfig {
            currency: self.currency,
            rates: self.pricing.clone(),
        }
    }

    /// Build the slot catalog, validating every configured slot
    pub fn catalog(&self) -> BookingResult<SlotCatalog> {
        match &self.slots {
            Some(slots) => SlotCatalog::from_slots(slots.clone()),
            None => Ok(SlotCatalog::default_template()),
        }
    }
}
