//! # tutor-api
//!
//! HTTP API layer for tuition-booking-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - REST endpoints for availability, bookings and payments
//! - Processor return pages and the SumUp webhook
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/availability?date=` | Bookable slots for a date |
//! | GET | `/api/v1/pricing` | Rate table and quotes |
//! | POST | `/api/v1/bookings` | Reserve a slot |
//! | GET | `/api/v1/bookings/{id}` | Booking with payments |
//! | GET | `/api/v1/students/{id}/bookings` | Student's bookings |
//! | POST | `/api/v1/bookings/{id}/cancel` | Cancel (and refund) |
//! | POST | `/api/v1/bookings/{id}/complete` | Mark held |
//! | POST | `/api/v1/bookings/{id}/no-show` | Mark no-show |
//! | POST | `/api/v1/bookings/{id}/payments` | Open payment |
//! | POST | `/api/v1/payments/{id}/checkout` | Create checkout |
//! | GET | `/api/v1/payments/{id}` | Payment with refunds |
//! | POST | `/api/v1/payments/{id}/refunds` | Refund |
//! | GET | `/api/v1/payments/{id}/invoice` | Invoice for a paid payment |
//! | GET | `/payments/{id}/success` | Processor return URL |
//! | GET | `/payments/{id}/cancel` | Processor cancel URL |
//! | POST | `/webhook/sumup` | SumUp webhook |

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
