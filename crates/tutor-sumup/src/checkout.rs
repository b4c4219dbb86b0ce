//! # SumUp Checkouts
//!
//! Implementation of the SumUp Checkouts API behind the engine's
//! `PaymentProcessor` trait.

use crate::config::SumUpConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use tutor_core::{
    BookingError, BookingResult, CheckoutHandle, CheckoutRequest, Currency, PaymentProcessor,
    ProcessorStatus, RefundReceipt,
};

const PROVIDER: &str = "sumup";

/// SumUp hosted checkout processor
pub struct SumUpProcessor {
    config: SumUpConfig,
    client: Client,
}

impl SumUpProcessor {
    /// Create a new SumUp processor
    pub fn new(config: SumUpConfig) -> BookingResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                BookingError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &SumUpConfig {
        &self.config
    }

    fn provider_error(status: StatusCode, body: &str) -> BookingError {
        error!("SumUp API error: status={}, body={}", status, body);

        let message = match serde_json::from_str::<SumUpErrorResponse>(body) {
            Ok(parsed) => match parsed.error_code {
                Some(code) => format!("{} ({})", parsed.message, code),
                None => parsed.message,
            },
            Err(_) => format!("HTTP {}: {}", status, body),
        };

        if status.is_server_error() {
            BookingError::ProcessorUnavailable(message)
        } else {
            BookingError::ProviderError {
                provider: PROVIDER.to_string(),
                message,
            }
        }
    }

    async fn read_body(response: reqwest::Response) -> BookingResult<(StatusCode, String)> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BookingError::ProcessorUnavailable(e.to_string()))?;
        Ok((status, body))
    }
}

/// Map a SumUp checkout status string to the engine's view
pub fn map_checkout_status(status: &str, transaction_id: Option<String>) -> ProcessorStatus {
    match status.to_ascii_uppercase().as_str() {
        "PAID" => ProcessorStatus::Paid { transaction_id },
        "PENDING" => ProcessorStatus::Pending,
        "FAILED" | "EXPIRED" => ProcessorStatus::Failed,
        _ => ProcessorStatus::Unknown,
    }
}

#[async_trait]
impl PaymentProcessor for SumUpProcessor {
    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn create_checkout(&self, request: &CheckoutRequest) -> BookingResult<CheckoutHandle> {
        if request.amount <= 0 {
            return Err(BookingError::InvalidRequest(
                "Checkout amount must be positive".to_string(),
            ));
        }

        let body = SumUpCheckoutRequest {
            checkout_reference: &request.reference,
            amount: request.currency.to_major(request.amount),
            currency: request.currency.as_str().to_ascii_uppercase(),
            merchant_code: &self.config.merchant_code,
            description: &request.description,
            redirect_url: &request.success_url,
            return_url: &request.success_url,
            hosted_checkout: HostedCheckout { enabled: true },
        };

        debug!(
            "Creating SumUp checkout: amount={} {}",
            body.amount, body.currency
        );

        let url = format!("{}/checkouts", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| BookingError::ProcessorUnavailable(e.to_string()))?;

        let (status, text) = Self::read_body(response).await?;
        if !status.is_success() {
            return Err(Self::provider_error(status, &text));
        }

        let checkout: SumUpCheckoutResponse = serde_json::from_str(&text).map_err(|e| {
            BookingError::Serialization(format!("Failed to parse SumUp response: {}", e))
        })?;

        info!(
            "Created SumUp checkout: id={}, hosted={}",
            checkout.id,
            checkout.hosted_checkout_url.is_some()
        );

        Ok(CheckoutHandle {
            checkout_id: checkout.id,
            checkout_url: checkout.hosted_checkout_url,
        })
    }

    #[instrument(skip(self))]
    async fn checkout_status(&self, checkout_id: &str) -> BookingResult<ProcessorStatus> {
        let url = format!("{}/checkouts/{}", self.config.api_base_url, checkout_id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.config.auth_header())
            .send()
            .await
            .map_err(|e| BookingError::ProcessorUnavailable(e.to_string()))?;

        let (status, text) = Self::read_body(response).await?;
        if status == StatusCode::NOT_FOUND {
            warn!("SumUp does not know checkout {}", checkout_id);
            return Ok(ProcessorStatus::Unknown);
        }
        if !status.is_success() {
            return Err(Self::provider_error(status, &text));
        }

        let checkout: SumUpCheckoutResponse = serde_json::from_str(&text).map_err(|e| {
            BookingError::Serialization(format!("Failed to parse SumUp response: {}", e))
        })?;

        let transaction_id = checkout.transaction_id.clone().or_else(|| {
            checkout
                .transactions
                .iter()
                .find(|t| t.status.eq_ignore_ascii_case("SUCCESSFUL"))
                .map(|t| t.id.clone())
        });

        debug!("SumUp checkout {} status={}", checkout.id, checkout.status);
        Ok(map_checkout_status(&checkout.status, transaction_id))
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        transaction_id: &str,
        amount: i64,
        currency: Currency,
    ) -> BookingResult<RefundReceipt> {
        let url = format!("{}/me/refund/{}", self.config.api_base_url, transaction_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .json(&SumUpRefundRequest {
                amount: currency.to_major(amount),
            })
            .send()
            .await
            .map_err(|e| BookingError::ProcessorUnavailable(e.to_string()))?;

        let (status, text) = Self::read_body(response).await?;
        if !status.is_success() {
            return Err(Self::provider_error(status, &text));
        }

        // SumUp answers 204 with no body; a body, when present, may carry an id.
        let refund_id = serde_json::from_str::<SumUpRefundResponse>(&text)
            .ok()
            .and_then(|r| r.id)
            .unwrap_or_else(|| format!("refund-{}", transaction_id));

        info!("Refunded {} on SumUp transaction {}", currency.display(amount), transaction_id);
        Ok(RefundReceipt { refund_id })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

// =============================================================================
// SumUp API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct SumUpCheckoutRequest<'a> {
    checkout_reference: &'a str,
    amount: f64,
    currency: String,
    merchant_code: &'a str,
    description: &'a str,
    redirect_url: &'a str,
    return_url: &'a str,
    hosted_checkout: HostedCheckout,
}

#[derive(Debug, Serialize)]
struct HostedCheckout {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct SumUpCheckoutResponse {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    hosted_checkout_url: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    transactions: Vec<SumUpTransaction>,
}

#[derive(Debug, Deserialize)]
struct SumUpTransaction {
    id: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Serialize)]
struct SumUpRefundRequest {
    amount: f64,
}

#[derive(Debug, Deserialize)]
struct SumUpRefundResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SumUpErrorResponse {
    message: String,
    #[serde(default)]
    error_code: Option<String>,
}
