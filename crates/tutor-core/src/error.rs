//! # Booking Error Types
//!
//! Typed error handling for the booking engine.
//! All allocation and payment operations return `Result<T, BookingError>`.
//! Expected business outcomes (slot taken, illegal transition) are variants
//! here, never panics.

use thiserror::Error;
use uuid::Uuid;

/// Core error type for all booking and payment operations
#[derive(Debug, Error)]
pub enum BookingError {
    /// Another live booking already holds the slot, or the slot is not offered
    #[error("Slot unavailable: {date} {start_time}")]
    SlotUnavailable { date: String, start_time: String },

    /// State machine violation
    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// Malformed or past date
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Duration outside the offered set, or a session that runs past midnight
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Booking not found
    #[error("Booking not found: {booking_id}")]
    BookingNotFound { booking_id: Uuid },

    /// Payment not found by id
    #[error("Payment not found: {payment_id}")]
    PaymentNotFound { payment_id: Uuid },

    /// Webhook referenced a checkout we never issued
    #[error("Unknown payment for checkout: {checkout_id}")]
    UnknownPayment { checkout_id: String },

    /// Actor does not own the resource
    #[error("User {user_id} may not act on this booking")]
    Forbidden { user_id: u64 },

    /// Booking already has a completed payment
    #[error("Booking already paid: {booking_id}")]
    AlreadyPaid { booking_id: Uuid },

    /// Refund amount or payment state does not allow a refund
    #[error("Invalid refund: {0}")]
    InvalidRefund(String),

    /// Processor call failed or timed out (retryable)
    #[error("Payment processor unavailable: {0}")]
    ProcessorUnavailable(String),

    /// Processor answered with an error
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Payment and booking cascade could not be applied together
    #[error("Consistency error: {0}")]
    ConsistencyError(String),

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookingError {
    pub fn invalid_booking_transition(from: impl ToString, to: impl ToString) -> Self {
        BookingError::InvalidTransition {
            entity: "booking",
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invalid_payment_transition(from: impl ToString, to: impl ToString) -> Self {
        BookingError::InvalidTransition {
            entity: "payment",
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns true if the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingError::ProcessorUnavailable(_) | BookingError::ProviderError { .. }
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            BookingError::SlotUnavailable { .. } => 409,
            BookingError::InvalidTransition { .. } => 409,
            BookingError::InvalidDate(_) => 400,
            BookingError::InvalidDuration(_) => 400,
            BookingError::InvalidRequest(_) => 400,
            BookingError::BookingNotFound { .. } => 404,
            BookingError::PaymentNotFound { .. } => 404,
            BookingError::UnknownPayment { .. } => 404,
            BookingError::Forbidden { .. } => 403,
            BookingError::AlreadyPaid { .. } => 409,
            BookingError::InvalidRefund(_) => 400,
            BookingError::ProcessorUnavailable(_) => 503,
            BookingError::ProviderError { .. } => 502,
            BookingError::ConsistencyError(_) => 500,
            BookingError::WebhookVerificationFailed(_) => 401,
            BookingError::WebhookParseError(_) => 400,
            BookingError::Configuration(_) => 500,
            BookingError::Serialization(_) => 500,
            BookingError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable error code
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::SlotUnavailable { .. } => "SlotUnavailable",
            BookingError::InvalidTransition { .. } => "InvalidTransition",
            BookingError::InvalidDate(_) => "InvalidDate",
            BookingError::InvalidDuration(_) => "InvalidDuration",
            BookingError::InvalidRequest(_) => "InvalidRequest",
            BookingError::BookingNotFound { .. } => "BookingNotFound",
            BookingError::PaymentNotFound { .. } => "PaymentNotFound",
            BookingError::UnknownPayment { .. } => "UnknownPayment",
            BookingError::Forbidden { .. } => "Forbidden",
            BookingError::AlreadyPaid { .. } => "AlreadyPaid",
            BookingError::InvalidRefund(_) => "InvalidRefund",
            BookingError::ProcessorUnavailable(_) => "ProcessorUnavailable",
            BookingError::ProviderError { .. } => "ProviderError",
            BookingError::ConsistencyError(_) => "ConsistencyError",
            BookingError::WebhookVerificationFailed(_) => "WebhookVerificationFailed",
            BookingError::WebhookParseError(_) => "WebhookParseError",
            BookingError::Configuration(_) => "Configuration",
            BookingError::Serialization(_) => "Serialization",
            BookingError::Internal(_) => "Internal",
        }
    }
}

/// Result type alias for booking operations
pub type BookingResult<T> = Result<T, BookingError>;
