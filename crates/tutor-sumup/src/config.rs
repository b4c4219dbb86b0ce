//! # SumUp Configuration
//!
//! Configuration management for the SumUp integration.
//! All secrets are loaded from environment variables.

use std::env;
use tutor_core::{BookingError, BookingResult};

pub const DEFAULT_API_BASE_URL: &str = "https://api.sumup.com/v0.1";

/// SumUp API configuration
#[derive(Debug, Clone)]
pub struct SumUpConfig {
    /// Secret API key (sup_sk_...)
    pub api_key: String,

    /// Merchant code receiving the funds
    pub merchant_code: String,

    /// Shared secret for webhook signatures. Unsigned webhooks are accepted
    /// when this is unset.
    pub webhook_secret: Option<String>,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,
}

impl SumUpConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `SUMUP_API_KEY` is unset or empty; callers then
    /// run without a live processor.
    ///
    /// Env vars:
    /// - `SUMUP_API_KEY`
    /// - `SUMUP_MERCHANT_CODE` (required once an API key is set)
    /// - `SUMUP_API_URL` (optional)
    /// - `SUMUP_WEBHOOK_SECRET` (optional)
    pub fn from_env() -> BookingResult<Option<Self>> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let api_key = match env::var("SUMUP_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => return Ok(None),
        };

        let merchant_code = env::var("SUMUP_MERCHANT_CODE")
            .ok()
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| {
                BookingError::Configuration(
                    "SUMUP_MERCHANT_CODE must be set when SUMUP_API_KEY is".to_string(),
                )
            })?;

        let api_base_url =
            env::var("SUMUP_API_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());

        let webhook_secret = env::var("SUMUP_WEBHOOK_SECRET")
            .ok()
            .filter(|secret| !secret.is_empty());

        Ok(Some(
            Self::new(api_key, merchant_code)
                .with_api_base_url(api_base_url)
                .with_webhook_secret(webhook_secret),
        ))
    }

    /// Create config with explicit values (for testing)
    pub fn new(api_key: impl Into<String>, merchant_code: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            merchant_code: merchant_code.into(),
            webhook_secret: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_header() {
        let config = SumUpConfig::new("sup_sk_abc123", "MC123");
        assert_eq!(config.auth_header(), "Bearer sup_sk_abc123");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert!(config.webhook_secret.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = SumUpConfig::new("k", "m").with_api_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_from_env_without_key() {
        env::remove_var("SUMUP_API_KEY");

        let result = SumUpConfig::from_env().unwrap();
        assert!(result.is_none());
    }
}
