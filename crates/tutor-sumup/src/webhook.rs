//! # SumUp Webhook Handling
//!
//! Parses SumUp webhook bodies into provider-neutral [`ProcessorEvent`]s and
//! optionally verifies an HMAC-SHA256 signature over the raw body.
//!
//! SumUp posts `{"event_type": "checkout.completed", "id": "<checkout id>",
//! "transaction_id": "..."}`.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};
use tutor_core::{BookingError, BookingResult, ProcessorEvent, ProcessorEventType};

/// Header carrying the hex HMAC of the raw body
pub const SIGNATURE_HEADER: &str = "x-payload-signature";

#[derive(Debug, Deserialize)]
struct SumUpWebhookPayload {
    event_type: String,
    /// Checkout id
    id: String,
    #[serde(default)]
    transaction_id: Option<String>,
}

/// Parse a raw webhook body. Unparseable bodies fail with `WebhookParseError`.
pub fn parse_webhook_payload(payload: &[u8]) -> BookingResult<ProcessorEvent> {
    let raw: SumUpWebhookPayload = serde_json::from_slice(payload).map_err(|e| {
        BookingError::WebhookParseError(format!("Failed to parse webhook: {}", e))
    })?;

    if raw.id.trim().is_empty() {
        return Err(BookingError::WebhookParseError(
            "Missing checkout id".to_string(),
        ));
    }

    debug!("Parsed SumUp webhook: type={}, checkout={}", raw.event_type, raw.id);

    Ok(ProcessorEvent {
        event_type: ProcessorEventType::from(raw.event_type),
        checkout_id: raw.id,
        transaction_id: raw.transaction_id.filter(|t| !t.is_empty()),
    })
}

/// Verifies (when a secret is configured) and parses webhook deliveries
#[derive(Debug, Clone, Default)]
pub struct SumUpWebhook {
    secret: Option<String>,
}

impl SumUpWebhook {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// Verify the signature header, then parse the body
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> BookingResult<ProcessorEvent> {
        if let Some(secret) = &self.secret {
            let signature = signature.ok_or_else(|| {
                warn!("SumUp webhook missing {} header", SIGNATURE_HEADER);
                BookingError::WebhookVerificationFailed("Missing signature".to_string())
            })?;
            verify_signature(secret, payload, signature)?;
        }
        parse_webhook_payload(payload)
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Check `signature` (hex, optionally prefixed `sha256=`) against the body
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> BookingResult<()> {
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let provided = hex::decode(provided).map_err(|_| {
        BookingError::WebhookVerificationFailed("Signature is not hex".to_string())
    })?;

    keyed_mac(secret, payload)?
        .verify_slice(&provided)
        .map_err(|_| BookingError::WebhookVerificationFailed("Signature mismatch".to_string()))
}

/// Hex HMAC-SHA256 of `payload`, as SumUp sends it
pub fn compute_hmac_sha256(secret: &str, payload: &[u8]) -> BookingResult<String> {
    let mac = keyed_mac(secret, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn keyed_mac(secret: &str, payload: &[u8]) -> BookingResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BookingError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(payload);
    Ok(mac)
}
