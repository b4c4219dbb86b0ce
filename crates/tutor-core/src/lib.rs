//! # tutor-core
//!
//! Slot allocation and payment lifecycle engine for the tuition booking service.
//!
//! This crate provides:
//! - `SlotCatalog` and `AvailabilityResolver` for the weekly template and per-date availability
//! - `PricingEngine` for deterministic session prices
//! - `BookingAllocator` for reserving slots and booking transitions
//! - `PaymentOrchestrator` and `WebhookIngestor` for the payment lifecycle
//! - `BookingLedger` (with `InMemoryLedger`) and `PaymentProcessor` ports
//! - `BookingError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use tutor_core::{BookingAllocator, BookingRequest, PaymentOrchestrator};
//!
//! // Reserve a slot
//! let booking = allocator.create_booking(request).await?;
//!
//! // Open a payment and a processor checkout for it
//! let payment = orchestrator.initiate_payment(booking.id, booking.student_id).await?;
//! let checkout = orchestrator.begin_checkout(payment.id).await?;
//!
//! // Redirect the student to checkout.checkout_url
//! ```

pub mod allocator;
pub mod availability;
pub mod booking;
pub mod clock;
pub mod config;
pub mod error;
pub mod hooks;
pub mod ledger;
pub mod memory;
pub mod orchestrator;
pub mod payment;
pub mod pricing;
pub mod processor;
pub mod slot;
pub mod webhook;

// Re-exports for convenience
pub use allocator::BookingAllocator;
pub use availability::{parse_date, AvailabilityResolver, AvailableSlot};
pub use booking::{Booking, BookingRequest, BookingStatus, DeliveryMode, UserId};
pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use config::TutoringConfig;
pub use error::{BookingError, BookingResult};
pub use hooks::{LifecycleHooks, LoggingHooks, SharedHooks};
pub use ledger::{BookingLedger, Completion, FailOutcome, OpenPayment, SharedLedger};
pub use memory::InMemoryLedger;
pub use orchestrator::{PaymentOrchestrator, PaymentSettings, Settlement};
pub use payment::{
    effective_paid_amount, invoice_number, BillingDetails, Invoice, Payment, PaymentStatus, Refund,
};
pub use pricing::{Currency, PricingConfig, PricingEngine, RateTable, SessionLength, SessionType};
pub use processor::{
    CheckoutHandle, CheckoutRequest, CheckoutUrls, DemoProcessor, PaymentProcessor,
    ProcessorStatus, RefundReceipt, SharedProcessor,
};
pub use slot::{RecurringSlot, SlotCatalog};
pub use webhook::{ProcessorEvent, ProcessorEventType, WebhookAck, WebhookIngestor};
