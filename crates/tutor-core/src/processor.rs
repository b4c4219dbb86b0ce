//! # Payment Processor Trait
//!
//! Narrow contract the engine needs from an external payment processor.
//! Implementations: SumUp (`tutor-sumup`), and the in-process
//! [`DemoProcessor`] used when no processor credentials are configured.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PaymentProcessor (trait)                   │
//! │  ├── create_checkout()                                      │
//! │  ├── checkout_status()                                      │
//! │  ├── refund()                                               │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                  ┌─────────┴─────────┐
//!          ┌───────┴───────┐   ┌───────┴───────┐
//!          │ SumUpProcessor│   │ DemoProcessor │
//!          └───────────────┘   └───────────────┘
//! ```

use crate::error::BookingResult;
use crate::pricing::Currency;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// What the engine asks the processor to charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Our reference (sent to the processor as checkout reference)
    pub reference: String,
    pub payment_id: Uuid,
    /// Minor units
    pub amount: i64,
    pub currency: Currency,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Processor-side checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutHandle {
    pub checkout_id: String,
    /// Hosted payment page. Absent when the processor settles in-process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

/// Processor view of a checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ProcessorStatus {
    Paid { transaction_id: Option<String> },
    Pending,
    Failed,
    Unknown,
}

/// Confirmation of an issued refund
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_id: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a hosted checkout for `request`
    async fn create_checkout(&self, request: &CheckoutRequest) -> BookingResult<CheckoutHandle>;

    /// Query the outcome of a checkout
    async fn checkout_status(&self, checkout_id: &str) -> BookingResult<ProcessorStatus>;

    /// Refund `amount` minor units of a captured transaction
    async fn refund(
        &self,
        transaction_id: &str,
        amount: i64,
        currency: Currency,
    ) -> BookingResult<RefundReceipt>;

    /// Get the provider name (for logging and routing)
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a shared processor (dynamic dispatch)
pub type SharedProcessor = Arc<dyn PaymentProcessor>;

/// Return/cancel URLs handed to the processor
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the application (e.g., "https://tuitionhub.co.uk")
    pub base_url: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn success_url(&self, payment_id: Uuid) -> String {
        format!("{}/payments/{}/success", self.base_url, payment_id)
    }

    pub fn cancel_url(&self, payment_id: Uuid) -> String {
        format!("{}/payments/{}/cancel", self.base_url, payment_id)
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

/// Processor used when no credentials are configured.
///
/// Issues `demo-checkout-*` ids without a hosted page, reports every
/// checkout as paid and accepts every refund.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoProcessor;

#[async_trait]
impl PaymentProcessor for DemoProcessor {
    async fn create_checkout(&self, request: &CheckoutRequest) -> BookingResult<CheckoutHandle> {
        Ok(CheckoutHandle {
            checkout_id: format!("demo-checkout-{}", request.payment_id),
            checkout_url: None,
        })
    }

    async fn checkout_status(&self, checkout_id: &str) -> BookingResult<ProcessorStatus> {
        Ok(ProcessorStatus::Paid {
            transaction_id: Some(format!("demo-txn-{}", checkout_id)),
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        _amount: i64,
        _currency: Currency,
    ) -> BookingResult<RefundReceipt> {
        Ok(RefundReceipt {
            refund_id: format!("demo-refund-{}", transaction_id),
        })
    }

    fn provider_name(&self) -> &'static str {
        "demo"
    }
}
