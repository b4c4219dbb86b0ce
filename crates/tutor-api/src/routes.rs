//! # Routes
//!
//! Axum router configuration for the booking API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - API v1:
///   - GET  /api/v1/availability?date=YYYY-MM-DD
///   - GET  /api/v1/pricing
///   - POST /api/v1/bookings
///   - GET  /api/v1/bookings/{booking_id}
///   - POST /api/v1/bookings/{booking_id}/cancel | complete | no-show | payments
///   - GET  /api/v1/students/{student_id}/bookings?status=
///   - POST /api/v1/payments/{payment_id}/checkout
///   - GET  /api/v1/payments/{payment_id}
///   - POST /api/v1/payments/{payment_id}/refunds
///   - GET  /api/v1/payments/{payment_id}/invoice?user_id=&billing_name=&billing_email=
///
/// - Processor return pages:
///   - GET /payments/{payment_id}/success
///   - GET /payments/{payment_id}/cancel
///
/// - Webhooks:
///   - POST /webhook/sumup
pub fn create_router(state: AppState) -> Router {
    // Browser clients call the API from the booking site
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let booking_routes = Router::new()
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/{booking_id}", get(handlers::get_booking))
        .route("/bookings/{booking_id}/cancel", post(handlers::cancel_booking))
        .route("/bookings/{booking_id}/complete", post(handlers::complete_booking))
        .route("/bookings/{booking_id}/no-show", post(handlers::no_show_booking))
        .route("/bookings/{booking_id}/payments", post(handlers::initiate_payment))
        .route(
            "/students/{student_id}/bookings",
            get(handlers::student_bookings),
        );

    let payment_routes = Router::new()
        .route("/payments/{payment_id}", get(handlers::get_payment))
        .route("/payments/{payment_id}/checkout", post(handlers::begin_checkout))
        .route("/payments/{payment_id}/refunds", post(handlers::refund_payment))
        .route("/payments/{payment_id}/invoice", get(handlers::get_invoice));

    let api_routes = Router::new()
        .route("/availability", get(handlers::availability))
        .route("/pricing", get(handlers::pricing))
        .merge(booking_routes)
        .merge(payment_routes);

    // Processor return pages
    let return_routes = Router::new()
        .route("/{payment_id}/success", get(handlers::payment_success))
        .route("/{payment_id}/cancel", get(handlers::payment_cancel));

    // Webhook routes (raw body, signature checked in the handler)
    let webhook_routes = Router::new().route("/sumup", post(handlers::sumup_webhook));

    Router::new()
        // Health check at root
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/v1", api_routes)
        .nest("/payments", return_routes)
        .nest("/webhook", webhook_routes)
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        // State
        .with_state(state)
}
