//! # Application State
//!
//! Shared state for the Axum application.
//! Wires the ledger, allocator, orchestrator and webhook ingestion together
//! with the configured payment processor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tutor_core::{
    BookingAllocator, CheckoutUrls, DemoProcessor, InMemoryLedger, LoggingHooks,
    PaymentOrchestrator, PaymentSettings, PricingEngine, SharedClock, SharedHooks,
    SharedLedger, SharedProcessor, SystemClock, TutoringConfig, WebhookIngestor,
};
use tutor_sumup::{SumUpConfig, SumUpProcessor, SumUpWebhook};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for processor return/cancel callbacks
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Explicit path to tutoring.toml
    pub tutoring_config: Option<String>,
    /// Upper bound for every processor call
    pub processor_timeout_secs: u64,
    /// Refund completed payments when a booking is cancelled
    pub refund_on_cancel: bool,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            tutoring_config: std::env::var("TUTORING_CONFIG").ok(),
            processor_timeout_secs: std::env::var("PROCESSOR_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(30),
            refund_on_cancel: std::env::var("REFUND_ON_CANCEL")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                anyhow::anyhow!("Invalid socket address {}:{}: {}", self.host, self.port, e)
            })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    pub allocator: BookingAllocator,
    pub orchestrator: PaymentOrchestrator,
    pub webhooks: WebhookIngestor,
    /// SumUp webhook signature check and parsing
    pub sumup_webhook: SumUpWebhook,
    /// Processor return/cancel URLs
    pub urls: CheckoutUrls,
}

impl AppState {
    /// Create the production state: config from env, SumUp when configured,
    /// otherwise the demo processor.
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();
        let tutoring = load_tutoring_config(config.tutoring_config.as_deref())?;

        let (processor, sumup_webhook): (SharedProcessor, SumUpWebhook) =
            match SumUpConfig::from_env()
                .map_err(|e| anyhow::anyhow!("Failed to load SumUp config: {}", e))?
            {
                Some(sumup) => {
                    let webhook = SumUpWebhook::new(sumup.webhook_secret.clone());
                    let processor = SumUpProcessor::new(sumup)
                        .map_err(|e| anyhow::anyhow!("Failed to initialize SumUp: {}", e))?;
                    (Arc::new(processor) as SharedProcessor, webhook)
                }
                None => {
                    if config.is_production() {
                        return Err(anyhow::anyhow!(
                            "SUMUP_API_KEY must be set in production"
                        ));
                    }
                    tracing::warn!("SUMUP_API_KEY not set, using demo processor");
                    (Arc::new(DemoProcessor) as SharedProcessor, SumUpWebhook::default())
                }
            };

        Self::with_components(
            config,
            tutoring,
            Arc::new(InMemoryLedger::new()),
            processor,
            sumup_webhook,
            Arc::new(SystemClock),
        )
    }

    /// Assemble state from explicit parts
    pub fn with_components(
        config: AppConfig,
        tutoring: TutoringConfig,
        ledger: SharedLedger,
        processor: SharedProcessor,
        sumup_webhook: SumUpWebhook,
        clock: SharedClock,
    ) -> anyhow::Result<Self> {
        let catalog = tutoring
            .catalog()
            .map_err(|e| anyhow::anyhow!("Invalid slot template: {}", e))?;
        let pricing_config = tutoring.pricing_config();
        pricing_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid pricing: {}", e))?;

        let hooks: SharedHooks = Arc::new(LoggingHooks);
        let urls = CheckoutUrls::new(config.base_url.clone());

        let allocator = BookingAllocator::new(
            Arc::new(catalog),
            ledger.clone(),
            PricingEngine::new(pricing_config.clone()),
            clock.clone(),
            hooks.clone(),
        );
        let orchestrator = PaymentOrchestrator::new(
            ledger,
            processor,
            urls.clone(),
            PaymentSettings {
                currency: pricing_config.currency,
                processor_timeout: Duration::from_secs(config.processor_timeout_secs),
                refund_on_cancel: config.refund_on_cancel,
            },
            clock,
            hooks,
        );
        let webhooks = WebhookIngestor::new(orchestrator.clone());

        Ok(Self {
            config,
            allocator,
            orchestrator,
            webhooks,
            sumup_webhook,
            urls,
        })
    }

    pub fn pricing(&self) -> &PricingEngine {
        self.allocator.pricing()
    }
}

/// Load tutoring config from an explicit path or the usual config locations
fn load_tutoring_config(explicit: Option<&str>) -> anyhow::Result<TutoringConfig> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
        return parse_tutoring_config(path, &content);
    }

    let config_paths = [
        "config/tutoring.toml",
        "../config/tutoring.toml",
        "../../config/tutoring.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            return parse_tutoring_config(path, &content);
        }
    }

    tracing::warn!("No tutoring config found, using default template and rates");
    Ok(TutoringConfig::default())
}

fn parse_tutoring_config(path: &str, content: &str) -> anyhow::Result<TutoringConfig> {
    let config = TutoringConfig::from_toml(content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
    tracing::info!(
        "Loaded tutoring config from {} ({} slots)",
        path,
        config.slots.as_ref().map(|s| s.len()).unwrap_or(0)
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            environment: "test".to_string(),
            tutoring_config: None,
            processor_timeout_secs: 5,
            refund_on_cancel: true,
        }
    }

    #[test]
    fn test_app_config_defaults() {
        // Clear env vars for test
        std::env::remove_var("HOST");
        std::env::remove_var("PORT");
        std::env::remove_var("PROCESSOR_TIMEOUT_SECS");
        std::env::remove_var("REFUND_ON_CANCEL");

        let config = AppConfig::from_env();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.processor_timeout_secs, 30);
        assert!(config.refund_on_cancel);
    }

    #[test]
    fn test_socket_addr() {
        let addr = config().socket_addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:3000");

        let bad = AppConfig {
            host: "not a host".to_string(),
            ..config()
        };
        assert!(bad.socket_addr().is_err());
    }

    #[test]
    fn test_with_components_uses_configured_currency() {
        let tutoring = TutoringConfig::from_toml("currency = \"eur\"").unwrap();
        let state = AppState::with_components(
            config(),
            tutoring,
            Arc::new(InMemoryLedger::new()),
            Arc::new(DemoProcessor),
            SumUpWebhook::default(),
            Arc::new(SystemClock),
        )
        .unwrap();

        assert_eq!(state.pricing().currency(), tutor_core::Currency::EUR);
        assert_eq!(state.orchestrator.settings().currency, tutor_core::Currency::EUR);
        assert_eq!(state.orchestrator.provider_name(), "demo");
    }

    #[test]
    fn test_missing_explicit_config_file_fails() {
        assert!(load_tutoring_config(Some("/nonexistent/tutoring.toml")).is_err());
    }
}
