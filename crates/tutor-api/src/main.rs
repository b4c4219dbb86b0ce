//! # Tuition Booking
//!
//! Slot booking and payment service for tutoring sessions.
//!
//! ## Usage
//!
//! ```bash
//! # Optional: live payments (demo processor otherwise)
//! export SUMUP_API_KEY=sup_sk_...
//! export SUMUP_MERCHANT_CODE=M...
//! export SUMUP_WEBHOOK_SECRET=...
//!
//! # Optional: slot template and rates
//! export TUTORING_CONFIG=config/tutoring.toml
//!
//! # Run the server
//! tuition-booking
//! ```

use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tutor_api::{routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Initialize application state
    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Payment processor: {}", state.orchestrator.provider_name());
    info!(
        "Processor timeout: {}s, refund on cancel: {}",
        state.config.processor_timeout_secs, state.config.refund_on_cancel
    );

    // Create router
    let app = routes::create_router(state);

    info!("Tuition booking starting on http://{}", addr);

    if !is_prod {
        info!("Availability: GET http://{}/api/v1/availability?date=YYYY-MM-DD", addr);
        info!("Bookings: POST http://{}/api/v1/bookings", addr);
        info!("Webhook: POST http://{}/webhook/sumup", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
