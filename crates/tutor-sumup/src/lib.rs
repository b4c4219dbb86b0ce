//! # tutor-sumup
//!
//! SumUp payment processor for tuition-booking-rs.
//!
//! Provides [`SumUpProcessor`], an implementation of
//! `tutor_core::PaymentProcessor` over the SumUp Checkouts API:
//! hosted checkout creation, checkout status lookup and refunds.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tutor_sumup::{SumUpConfig, SumUpProcessor};
//!
//! // None when SUMUP_API_KEY is unset
//! if let Some(config) = SumUpConfig::from_env()? {
//!     let processor = SumUpProcessor::new(config)?;
//!     let handle = processor.create_checkout(&request).await?;
//!     // Redirect the student to handle.checkout_url
//! }
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! use tutor_sumup::SumUpWebhook;
//!
//! let verifier = SumUpWebhook::new(config.webhook_secret.clone());
//! let event = verifier.verify_and_parse(&body, signature_header)?;
//! let ack = ingestor.handle_event(event).await?;
//! ```

pub mod checkout;
pub mod config;
pub mod webhook;

// Re-exports
pub use checkout::{map_checkout_status, SumUpProcessor};
pub use config::SumUpConfig;
pub use webhook::{parse_webhook_payload, verify_signature, SumUpWebhook, SIGNATURE_HEADER};
