//! # Request Handlers
//!
//! Axum request handlers for the booking and payment API.
//! Identity comes from the caller (`user_id` in the body); authentication
//! sits in front of this service.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use tutor_core::{
    effective_paid_amount, parse_date, AvailableSlot, BillingDetails, Booking, BookingError,
    BookingRequest, BookingStatus, Invoice, Payment, Refund, SessionLength, SessionType,
    Settlement, UserId, WebhookAck,
};
use tutor_sumup::SIGNATURE_HEADER;
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub date: String,
    pub slots: Vec<AvailableSlot>,
}

#[derive(Debug, Serialize)]
pub struct PriceQuote {
    pub session_type: SessionType,
    pub duration_hours: f64,
    pub amount: i64,
    pub display: String,
}

#[derive(Debug, Serialize)]
pub struct PricingResponse {
    pub currency: String,
    pub rates: tutor_core::RateTable,
    pub quotes: Vec<PriceQuote>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub status: Option<String>,
}

/// Acting user for student operations
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct BookingDetail {
    pub booking: Booking,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub booking: Booking,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<Refund>,
    /// Cancellation applied but the refund still needs attention
    pub refund_pending: bool,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub payment_id: Uuid,
    pub checkout_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    /// Where to send the student next: the hosted page, or straight to the
    /// return URL when the processor settles in-process
    pub redirect_url: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentDetail {
    pub payment: Payment,
    pub refunds: Vec<Refund>,
    pub effective_paid: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    /// Minor units; defaults to the full amount
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub payment: Payment,
    pub refund: Refund,
}

/// Caller identity plus the billing details for a first invoice request
#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    pub user_id: UserId,
    #[serde(default)]
    pub billing_name: Option<String>,
    #[serde(default)]
    pub billing_email: Option<String>,
    #[serde(default)]
    pub billing_address: Option<String>,
}

impl InvoiceQuery {
    fn billing(&self) -> Option<BillingDetails> {
        if self.billing_name.is_none() && self.billing_email.is_none() {
            return None;
        }
        Some(BillingDetails {
            billing_name: self.billing_name.clone().unwrap_or_default(),
            billing_email: self.billing_email.clone().unwrap_or_default(),
            billing_address: self.billing_address.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub outcome: &'static str,
    pub payment_status: String,
}

impl From<&Settlement> for SettlementResponse {
    fn from(settlement: &Settlement) -> Self {
        let payment = settlement.payment();
        let outcome = match settlement {
            Settlement::Confirmed { .. } => "confirmed",
            Settlement::AlreadyConfirmed(_) => "already_confirmed",
            Settlement::Failed(_) => "failed",
            Settlement::AlreadyFailed(_) => "already_failed",
            Settlement::Unchanged(_) => "pending",
            Settlement::LateCapture { .. } => "late_capture",
        };
        Self {
            payment_id: payment.id,
            booking_id: payment.booking_id,
            outcome,
            payment_status: payment.status.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub ack: WebhookAck,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub kind: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16, kind: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
            kind: kind.into(),
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<T, ApiError>;

fn booking_error_to_response(err: BookingError) -> ApiError {
    let code = err.status_code();
    if code >= 500 {
        error!("Request failed: {}", err);
    }
    let response = ErrorResponse::new(err.to_string(), code, err.kind());
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tuition-booking",
        "processor": state.orchestrator.provider_name(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Bookable slots for a date
#[instrument(skip(state))]
pub async fn availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<Json<AvailabilityResponse>> {
    let raw = query.date.unwrap_or_default();
    let date = parse_date(&raw).map_err(booking_error_to_response)?;

    let slots = state
        .allocator
        .availability()
        .available_slots(date)
        .await
        .map_err(booking_error_to_response)?;

    Ok(Json(AvailabilityResponse {
        date: date.to_string(),
        slots,
    }))
}

/// Rate table and the price of every offered combination
pub async fn pricing(State(state): State<AppState>) -> Json<PricingResponse> {
    let engine = state.pricing();
    let currency = engine.currency();

    let mut quotes = Vec::new();
    for session_type in [SessionType::Solo, SessionType::Pair, SessionType::Triple] {
        for length in SessionLength::ALL {
            let amount = engine.price(session_type, length);
            quotes.push(PriceQuote {
                session_type,
                duration_hours: length.hours(),
                amount,
                display: currency.display(amount),
            });
        }
    }

    Json(PricingResponse {
        currency: currency.as_str().to_string(),
        rates: engine.rates().clone(),
        quotes,
    })
}

/// Reserve a slot
#[instrument(skip(state, body))]
pub async fn create_booking(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<Booking>)> {
    // Decoded here so validation failures come back as typed 400s
    let request: BookingRequest = serde_json::from_value(body)
        .map_err(|e| booking_error_to_response(BookingError::InvalidRequest(e.to_string())))?;

    let booking = state
        .allocator
        .create_booking(request)
        .await
        .map_err(booking_error_to_response)?;

    Ok((StatusCode::CREATED, Json(booking)))
}

/// Booking with its payment attempts
pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Json<BookingDetail>> {
    let booking = state
        .allocator
        .booking(booking_id)
        .await
        .map_err(booking_error_to_response)?;
    let payments = state
        .orchestrator
        .payments_for_booking(booking_id)
        .await
        .map_err(booking_error_to_response)?;

    Ok(Json(BookingDetail { booking, payments }))
}

/// A student's bookings, optionally filtered by `?status=`
pub async fn student_bookings(
    State(state): State<AppState>,
    Path(student_id): Path<UserId>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Vec<Booking>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<BookingStatus>)
        .transpose()
        .map_err(booking_error_to_response)?;

    let bookings = state
        .allocator
        .bookings_for_student(student_id, status)
        .await
        .map_err(booking_error_to_response)?;

    Ok(Json(bookings))
}

/// Student cancellation, followed by refund settlement
#[instrument(skip(state, actor), fields(user_id = actor.user_id))]
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(actor): Json<ActorRequest>,
) -> ApiResult<Json<CancelResponse>> {
    let booking = state
        .allocator
        .cancel_booking(booking_id, actor.user_id)
        .await
        .map_err(booking_error_to_response)?;

    // The cancellation stands even if the refund has to be retried later
    let (refund, refund_pending) = match state.orchestrator.settle_cancellation(&booking).await {
        Ok(refund) => (refund, false),
        Err(e) => {
            error!("Refund for cancelled booking {} failed: {}", booking.id, e);
            (None, true)
        }
    };

    Ok(Json(CancelResponse {
        booking,
        refund,
        refund_pending,
    }))
}

/// Administrative: session took place
pub async fn complete_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Json<Booking>> {
    state
        .allocator
        .mark_completed(booking_id)
        .await
        .map(Json)
        .map_err(booking_error_to_response)
}

/// Administrative: student did not attend
pub async fn no_show_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Json<Booking>> {
    state
        .allocator
        .mark_no_show(booking_id)
        .await
        .map(Json)
        .map_err(booking_error_to_response)
}

/// Open (or reuse) the payment for a booking
#[instrument(skip(state, actor), fields(user_id = actor.user_id))]
pub async fn initiate_payment(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(actor): Json<ActorRequest>,
) -> ApiResult<Json<Payment>> {
    state
        .orchestrator
        .initiate_payment(booking_id, actor.user_id)
        .await
        .map(Json)
        .map_err(booking_error_to_response)
}

/// Create the processor checkout for a payment
#[instrument(skip(state))]
pub async fn begin_checkout(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<CheckoutResponse>> {
    let handle = state
        .orchestrator
        .begin_checkout(payment_id)
        .await
        .map_err(booking_error_to_response)?;

    let redirect_url = handle
        .checkout_url
        .clone()
        .unwrap_or_else(|| state.urls.success_url(payment_id));

    Ok(Json(CheckoutResponse {
        payment_id,
        checkout_id: handle.checkout_id,
        checkout_url: handle.checkout_url,
        redirect_url,
    }))
}

/// Payment with its refunds
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<PaymentDetail>> {
    let payment = state
        .orchestrator
        .payment(payment_id)
        .await
        .map_err(booking_error_to_response)?;
    let refunds = state
        .orchestrator
        .refunds_for(payment_id)
        .await
        .map_err(booking_error_to_response)?;
    let effective_paid = effective_paid_amount(&payment, &refunds);

    Ok(Json(PaymentDetail {
        payment,
        refunds,
        effective_paid,
    }))
}

/// Refund a completed payment
#[instrument(skip(state, request))]
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> ApiResult<(StatusCode, Json<RefundResponse>)> {
    let reason = request
        .reason
        .unwrap_or_else(|| "Refund requested".to_string());
    let (payment, refund) = state
        .orchestrator
        .refund_payment(payment_id, request.amount, &reason)
        .await
        .map_err(booking_error_to_response)?;

    Ok((StatusCode::CREATED, Json(RefundResponse { payment, refund })))
}

/// Invoice for a paid payment; billing details are needed on first request
#[instrument(skip(state, query), fields(user_id = query.user_id))]
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Query(query): Query<InvoiceQuery>,
) -> ApiResult<Json<Invoice>> {
    state
        .orchestrator
        .invoice_for(payment_id, query.user_id, query.billing())
        .await
        .map(Json)
        .map_err(booking_error_to_response)
}

/// Processor return URL: ask the processor and apply the outcome
#[instrument(skip(state))]
pub async fn payment_success(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<SettlementResponse>> {
    let settlement = state
        .orchestrator
        .sync_with_processor(payment_id)
        .await
        .map_err(booking_error_to_response)?;

    Ok(Json(SettlementResponse::from(&settlement)))
}

/// Processor cancel URL: the student abandoned the checkout
#[instrument(skip(state))]
pub async fn payment_cancel(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<Payment>> {
    let payment = state
        .orchestrator
        .payment(payment_id)
        .await
        .map_err(booking_error_to_response)?;

    // The cancel URL is only ever issued to the payment's owner
    state
        .orchestrator
        .cancel_payment(payment_id, payment.user_id)
        .await
        .map(Json)
        .map_err(booking_error_to_response)
}

/// Handle SumUp webhook
#[instrument(skip(state, headers, body))]
pub async fn sumup_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let event = state
        .sumup_webhook
        .verify_and_parse(&body, signature)
        .map_err(|e| {
            warn!("Rejected webhook: {}", e);
            booking_error_to_response(e)
        })?;

    info!(
        "Received webhook: type={}, checkout={}",
        event.event_type, event.checkout_id
    );

    let ack = state
        .webhooks
        .handle_event(event)
        .await
        .map_err(booking_error_to_response)?;

    Ok(Json(WebhookResponse { status: "ok", ack }))
}
