//! End-to-end booking and payment lifecycle against the in-memory ledger.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tutor_core::{
    BillingDetails, Booking, BookingAllocator, BookingError, BookingLedger, BookingRequest,
    BookingResult, BookingStatus, CheckoutHandle, CheckoutRequest, CheckoutUrls, Currency,
    DeliveryMode, FixedClock, InMemoryLedger, LifecycleHooks, Payment, PaymentOrchestrator,
    PaymentProcessor, PaymentSettings, PaymentStatus, PricingConfig, PricingEngine,
    ProcessorEvent, ProcessorEventType, ProcessorStatus, Refund, RefundReceipt, SessionLength,
    SessionType, Settlement, SlotCatalog, WebhookAck, WebhookIngestor,
};

/// Processor whose reported status is set by the test
struct ScriptedProcessor {
    status: Mutex<ProcessorStatus>,
    delay: Option<Duration>,
    checkouts: AtomicUsize,
    refunds: AtomicUsize,
}

impl ScriptedProcessor {
    fn new() -> Self {
        Self {
            status: Mutex::new(ProcessorStatus::Pending),
            delay: None,
            checkouts: AtomicUsize::new(0),
            refunds: AtomicUsize::new(0),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    fn report(&self, status: ProcessorStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn create_checkout(&self, request: &CheckoutRequest) -> BookingResult<CheckoutHandle> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(CheckoutHandle {
            checkout_id: format!("chk_{}_{}", request.reference, n),
            checkout_url: Some(format!("https://pay.example/{}", n)),
        })
    }

    async fn checkout_status(&self, _checkout_id: &str) -> BookingResult<ProcessorStatus> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn refund(
        &self,
        transaction_id: &str,
        _amount: i64,
        _currency: Currency,
    ) -> BookingResult<RefundReceipt> {
        let n = self.refunds.fetch_add(1, Ordering::SeqCst);
        Ok(RefundReceipt {
            refund_id: format!("rf_{}_{}", transaction_id, n),
        })
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
struct CountingHooks {
    created: AtomicUsize,
    confirmed: AtomicUsize,
    cancelled: AtomicUsize,
    failed: AtomicUsize,
    refunded: AtomicUsize,
    late_refunded: AtomicUsize,
    unreconciled: AtomicUsize,
}

impl LifecycleHooks for CountingHooks {
    fn on_booking_created(&self, _booking: &Booking) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn on_booking_confirmed(&self, _booking: &Booking, _payment: &Payment) {
        self.confirmed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_booking_cancelled(&self, _booking: &Booking) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn on_payment_failed(&self, _payment: &Payment) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_refund_issued(&self, _payment: &Payment, _refund: &Refund) {
        self.refunded.fetch_add(1, Ordering::SeqCst);
    }

    fn on_late_capture(&self, _payment: &Payment, refund: Option<&Refund>) {
        match refund {
            Some(_) => self.late_refunded.fetch_add(1, Ordering::SeqCst),
            None => self.unreconciled.fetch_add(1, Ordering::SeqCst),
        };
    }
}

struct Harness {
    ledger: Arc<InMemoryLedger>,
    processor: Arc<ScriptedProcessor>,
    hooks: Arc<CountingHooks>,
    allocator: BookingAllocator,
    orchestrator: PaymentOrchestrator,
    webhooks: WebhookIngestor,
}

impl Harness {
    fn new() -> Self {
        Self::with_processor(ScriptedProcessor::new())
    }

    fn with_processor(processor: ScriptedProcessor) -> Self {
        Self::build(processor, true)
    }

    fn without_refund_on_cancel() -> Self {
        Self::build(ScriptedProcessor::new(), false)
    }

    fn build(processor: ScriptedProcessor, refund_on_cancel: bool) -> Self {
        // Friday 2026-10-16, 09:00 UTC
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()));
        let ledger = Arc::new(InMemoryLedger::new());
        let processor = Arc::new(processor);
        let hooks = Arc::new(CountingHooks::default());

        let allocator = BookingAllocator::new(
            Arc::new(SlotCatalog::default_template()),
            ledger.clone(),
            PricingEngine::new(PricingConfig::default()),
            clock.clone(),
            hooks.clone(),
        );
        let orchestrator = PaymentOrchestrator::new(
            ledger.clone(),
            processor.clone(),
            CheckoutUrls::new("https://tuitionhub.test"),
            PaymentSettings {
                processor_timeout: Duration::from_secs(5),
                refund_on_cancel,
                ..PaymentSettings::default()
            },
            clock,
            hooks.clone(),
        );
        let webhooks = WebhookIngestor::new(orchestrator.clone());

        Self {
            ledger,
            processor,
            hooks,
            allocator,
            orchestrator,
            webhooks,
        }
    }

    async fn paid_booking(&self, student_id: u64, hour: u32) -> (Booking, Payment) {
        let booking = self
            .allocator
            .create_booking(request(student_id, monday(), hour))
            .await
            .unwrap();
        let payment = self
            .orchestrator
            .initiate_payment(booking.id, student_id)
            .await
            .unwrap();
        let checkout = self.orchestrator.begin_checkout(payment.id).await.unwrap();
        self.webhooks
            .handle_event(completed(&checkout.checkout_id))
            .await
            .unwrap();
        (
            self.ledger.booking(booking.id).await.unwrap().unwrap(),
            self.ledger.payment(payment.id).await.unwrap().unwrap(),
        )
    }

    /// Booking with a payment sitting in the processor's hosted checkout
    async fn open_checkout(&self, student_id: u64, hour: u32) -> (Booking, Payment, String) {
        let booking = self
            .allocator
            .create_booking(request(student_id, monday(), hour))
            .await
            .unwrap();
        let payment = self
            .orchestrator
            .initiate_payment(booking.id, student_id)
            .await
            .unwrap();
        let checkout = self.orchestrator.begin_checkout(payment.id).await.unwrap();
        (booking, payment, checkout.checkout_id)
    }
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

fn at(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap()
}

fn request(student_id: u64, date: NaiveDate, hour: u32) -> BookingRequest {
    BookingRequest {
        student_id,
        date,
        start_time: at(hour),
        duration: SessionLength::OneHour,
        session_type: SessionType::Solo,
        delivery_mode: DeliveryMode::Online,
        course_ref: Some("gcse-maths".into()),
        notes: None,
    }
}

fn completed(checkout_id: &str) -> ProcessorEvent {
    ProcessorEvent {
        event_type: ProcessorEventType::CheckoutCompleted,
        checkout_id: checkout_id.to_string(),
        transaction_id: Some("txn_42".into()),
    }
}

#[tokio::test]
async fn test_monday_four_pm_scenario() {
    let h = Harness::new();

    let before = h.allocator.availability().available_slots(monday()).await.unwrap();
    assert!(before.iter().any(|s| s.start_time == at(16)));

    let booking = h.allocator.create_booking(request(7, monday(), 16)).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.end_time, at(17));
    assert_eq!(booking.price, 6_000);

    let after = h.allocator.availability().available_slots(monday()).await.unwrap();
    assert!(!after.iter().any(|s| s.start_time == at(16)));
    assert_eq!(after.len(), before.len() - 1);

    let payment = h.orchestrator.initiate_payment(booking.id, 7).await.unwrap();
    assert_eq!(payment.amount, 6_000);
    assert_eq!(payment.status, PaymentStatus::Pending);

    let checkout = h.orchestrator.begin_checkout(payment.id).await.unwrap();
    assert!(checkout.checkout_url.is_some());
    let processing = h.orchestrator.payment(payment.id).await.unwrap();
    assert_eq!(processing.status, PaymentStatus::Processing);

    h.processor.report(ProcessorStatus::Paid {
        transaction_id: Some("txn_1".into()),
    });
    let settlement = h.orchestrator.sync_with_processor(payment.id).await.unwrap();
    match settlement {
        Settlement::Confirmed { payment, booking } => {
            assert_eq!(payment.status, PaymentStatus::Completed);
            assert!(payment.paid_at.is_some());
            assert_eq!(booking.status, BookingStatus::Confirmed);
        }
        other => panic!("expected confirmation, got {:?}", other),
    }
    assert_eq!(h.hooks.created.load(Ordering::SeqCst), 1);
    assert_eq!(h.hooks.confirmed.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_for_one_slot() {
    let h = Harness::new();

    let mut tasks = Vec::new();
    for student_id in 0..16u64 {
        let allocator = h.allocator.clone();
        tasks.push(tokio::spawn(async move {
            allocator.create_booking(request(student_id, monday(), 18)).await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(BookingError::SlotUnavailable { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(h.ledger.live_start_times(monday()).await.unwrap(), vec![at(18)]);
}

#[tokio::test]
async fn test_rejects_past_and_unoffered_slots() {
    let h = Harness::new();

    let past = NaiveDate::from_ymd_opt(2026, 10, 12).unwrap();
    let err = h.allocator.create_booking(request(1, past, 16)).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidDate(_)));

    // Weekday mornings are not in the template
    let err = h.allocator.create_booking(request(1, monday(), 10)).await.unwrap_err();
    assert!(matches!(err, BookingError::SlotUnavailable { .. }));
    assert_eq!(h.hooks.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_initiate_payment_twice_returns_same_payment() {
    let h = Harness::new();
    let booking = h.allocator.create_booking(request(3, monday(), 17)).await.unwrap();

    let first = h.orchestrator.initiate_payment(booking.id, 3).await.unwrap();
    let second = h.orchestrator.initiate_payment(booking.id, 3).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.orchestrator.payments_for_booking(booking.id).await.unwrap().len(), 1);

    let err = h.orchestrator.initiate_payment(booking.id, 99).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden { user_id: 99 }));
}

#[tokio::test]
async fn test_begin_checkout_reuses_recorded_checkout() {
    let h = Harness::new();
    let booking = h.allocator.create_booking(request(3, monday(), 17)).await.unwrap();
    let payment = h.orchestrator.initiate_payment(booking.id, 3).await.unwrap();

    let first = h.orchestrator.begin_checkout(payment.id).await.unwrap();
    let second = h.orchestrator.begin_checkout(payment.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.processor.checkouts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_webhook_replay_is_idempotent() {
    let h = Harness::new();
    let booking = h.allocator.create_booking(request(5, monday(), 19)).await.unwrap();
    let payment = h.orchestrator.initiate_payment(booking.id, 5).await.unwrap();
    let checkout = h.orchestrator.begin_checkout(payment.id).await.unwrap();

    let first = h.webhooks.handle_event(completed(&checkout.checkout_id)).await.unwrap();
    let after_first = h.orchestrator.payment(payment.id).await.unwrap();

    let second = h.webhooks.handle_event(completed(&checkout.checkout_id)).await.unwrap();
    let after_second = h.orchestrator.payment(payment.id).await.unwrap();

    assert_eq!(first, WebhookAck::Applied);
    assert_eq!(second, WebhookAck::Duplicate);
    assert_eq!(after_first.status, PaymentStatus::Completed);
    assert_eq!(after_first.updated_at, after_second.updated_at);
    assert_eq!(after_second.external_transaction_id.as_deref(), Some("txn_42"));
    assert_eq!(h.hooks.confirmed.load(Ordering::SeqCst), 1);

    let booking = h.allocator.booking(booking.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_return_url_racing_webhook_confirms_once() {
    let h = Harness::new();
    let booking = h.allocator.create_booking(request(5, monday(), 20)).await.unwrap();
    let payment = h.orchestrator.initiate_payment(booking.id, 5).await.unwrap();
    let checkout = h.orchestrator.begin_checkout(payment.id).await.unwrap();
    h.processor.report(ProcessorStatus::Paid {
        transaction_id: Some("txn_42".into()),
    });

    let (direct, webhook) = tokio::join!(
        h.orchestrator.sync_with_processor(payment.id),
        h.webhooks.handle_event(completed(&checkout.checkout_id)),
    );
    direct.unwrap();
    webhook.unwrap();

    assert_eq!(h.hooks.confirmed.load(Ordering::SeqCst), 1);
    let payment = h.orchestrator.payment(payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_unknown_checkout_is_acknowledged() {
    let h = Harness::new();
    let booking = h.allocator.create_booking(request(5, monday(), 16)).await.unwrap();

    let ack = h.webhooks.handle_event(completed("chk_nobody")).await.unwrap();
    assert_eq!(ack, WebhookAck::UnknownPayment);

    let booking = h.allocator.booking(booking.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(h.hooks.confirmed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_checkout_keeps_booking_and_allows_retry() {
    let h = Harness::new();
    let booking = h.allocator.create_booking(request(8, monday(), 16)).await.unwrap();
    let payment = h.orchestrator.initiate_payment(booking.id, 8).await.unwrap();
    let checkout = h.orchestrator.begin_checkout(payment.id).await.unwrap();

    let failed = ProcessorEvent {
        event_type: ProcessorEventType::CheckoutFailed,
        checkout_id: checkout.checkout_id.clone(),
        transaction_id: None,
    };
    assert_eq!(h.webhooks.handle_event(failed.clone()).await.unwrap(), WebhookAck::Applied);
    assert_eq!(h.webhooks.handle_event(failed).await.unwrap(), WebhookAck::Duplicate);
    assert_eq!(h.hooks.failed.load(Ordering::SeqCst), 1);

    let booking = h.allocator.booking(booking.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);

    let retry = h.orchestrator.initiate_payment(booking.id, 8).await.unwrap();
    assert_ne!(retry.id, payment.id);
    assert_eq!(retry.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_late_failure_does_not_undo_payment() {
    let h = Harness::new();
    let (_, payment) = h.paid_booking(9, 17).await;

    let settlement = h
        .orchestrator
        .confirm_payment(payment.id, ProcessorStatus::Failed)
        .await
        .unwrap();
    assert!(matches!(settlement, Settlement::Unchanged(_)));
    assert_eq!(
        h.orchestrator.payment(payment.id).await.unwrap().status,
        PaymentStatus::Completed
    );
}

#[tokio::test]
async fn test_user_cancel_of_checkout() {
    let h = Harness::new();
    let booking = h.allocator.create_booking(request(4, monday(), 18)).await.unwrap();
    let payment = h.orchestrator.initiate_payment(booking.id, 4).await.unwrap();
    h.orchestrator.begin_checkout(payment.id).await.unwrap();

    let err = h.orchestrator.cancel_payment(payment.id, 5).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden { .. }));

    let cancelled = h.orchestrator.cancel_payment(payment.id, 4).await.unwrap();
    assert_eq!(cancelled.status, PaymentStatus::Failed);
    let again = h.orchestrator.cancel_payment(payment.id, 4).await.unwrap();
    assert_eq!(again.status, PaymentStatus::Failed);
    assert_eq!(h.hooks.failed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_processor_timeout_leaves_payment_pending() {
    let h = Harness::with_processor(ScriptedProcessor::slow(Duration::from_secs(60)));
    let booking = h.allocator.create_booking(request(2, monday(), 19)).await.unwrap();
    let payment = h.orchestrator.initiate_payment(booking.id, 2).await.unwrap();

    let err = h.orchestrator.begin_checkout(payment.id).await.unwrap_err();
    assert!(matches!(err, BookingError::ProcessorUnavailable(_)));
    assert!(err.is_retryable());

    let payment = h.orchestrator.payment(payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.external_checkout_id.is_none());
    assert_eq!(
        h.allocator.booking(booking.id).await.unwrap().status,
        BookingStatus::Pending
    );
}

#[tokio::test]
async fn test_cancelling_paid_booking_refunds_in_full() {
    let h = Harness::new();
    let (booking, payment) = h.paid_booking(6, 16).await;
    assert_eq!(booking.status, BookingStatus::Confirmed);

    let cancelled = h.allocator.cancel_booking(booking.id, 6).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let refund = h.orchestrator.settle_cancellation(&cancelled).await.unwrap();
    let refund = refund.expect("completed payment should be refunded");
    assert_eq!(refund.amount, payment.amount);
    assert_eq!(
        h.orchestrator.payment(payment.id).await.unwrap().status,
        PaymentStatus::Refunded
    );
    assert_eq!(h.hooks.refunded.load(Ordering::SeqCst), 1);
    assert_eq!(h.hooks.cancelled.load(Ordering::SeqCst), 1);

    // The slot is free again
    assert!(h
        .allocator
        .availability()
        .is_available(monday(), at(16))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_partial_refund_then_no_more() {
    let h = Harness::new();
    let (_, payment) = h.paid_booking(6, 17).await;

    let (updated, refund) = h
        .orchestrator
        .refund_payment(payment.id, Some(2_000), "Session shortened")
        .await
        .unwrap();
    assert_eq!(updated.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(refund.amount, 2_000);
    assert_eq!(h.orchestrator.refunds_for(payment.id).await.unwrap().len(), 1);

    let err = h
        .orchestrator
        .refund_payment(payment.id, Some(1_000), "again")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));
    assert_eq!(h.processor.refunds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_booking_transitions() {
    let h = Harness::new();
    let booking = h.allocator.create_booking(request(1, monday(), 20)).await.unwrap();

    // Pending bookings cannot be marked as held
    let err = h.allocator.mark_completed(booking.id).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));

    let err = h.allocator.cancel_booking(booking.id, 2).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden { .. }));

    h.allocator.cancel_booking(booking.id, 1).await.unwrap();
    let err = h.allocator.cancel_booking(booking.id, 1).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));

    // Cancelled bookings cannot be paid
    let err = h.orchestrator.initiate_payment(booking.id, 1).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_completed_session_lifecycle() {
    let h = Harness::new();
    let (booking, _) = h.paid_booking(2, 18).await;

    let done = h.allocator.mark_completed(booking.id).await.unwrap();
    assert_eq!(done.status, BookingStatus::Completed);

    let err = h.allocator.cancel_booking(booking.id, 2).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));

    let history = h
        .allocator
        .bookings_for_student(2, Some(BookingStatus::Completed))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_capture_after_cancellation_settled_is_refunded() {
    let h = Harness::new();
    let (booking, payment, checkout_id) = h.open_checkout(3, 16).await;

    let cancelled = h.allocator.cancel_booking(booking.id, 3).await.unwrap();
    assert!(h.orchestrator.settle_cancellation(&cancelled).await.unwrap().is_none());
    assert_eq!(
        h.orchestrator.payment(payment.id).await.unwrap().status,
        PaymentStatus::Failed
    );

    // The student had already paid on the hosted page
    let ack = h.webhooks.handle_event(completed(&checkout_id)).await.unwrap();
    assert_eq!(ack, WebhookAck::LateCapture);

    let payment = h.orchestrator.payment(payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.external_transaction_id.as_deref(), Some("txn_42"));
    assert_eq!(h.processor.refunds.load(Ordering::SeqCst), 1);
    assert_eq!(h.hooks.late_refunded.load(Ordering::SeqCst), 1);
    assert_eq!(h.hooks.confirmed.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.allocator.booking(booking.id).await.unwrap().status,
        BookingStatus::Cancelled
    );

    let ack = h.webhooks.handle_event(completed(&checkout_id)).await.unwrap();
    assert_eq!(ack, WebhookAck::Duplicate);
    assert_eq!(h.processor.refunds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_capture_before_cancellation_settled_is_refunded_once() {
    let h = Harness::new();
    let (booking, payment, checkout_id) = h.open_checkout(3, 17).await;

    let cancelled = h.allocator.cancel_booking(booking.id, 3).await.unwrap();
    let ack = h.webhooks.handle_event(completed(&checkout_id)).await.unwrap();
    assert_eq!(ack, WebhookAck::LateCapture);
    assert_eq!(h.processor.refunds.load(Ordering::SeqCst), 1);

    assert!(h.orchestrator.settle_cancellation(&cancelled).await.unwrap().is_none());
    assert_eq!(h.processor.refunds.load(Ordering::SeqCst), 1);
    assert_eq!(h.hooks.failed.load(Ordering::SeqCst), 0);

    let refunds = h.orchestrator.refunds_for(payment.id).await.unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, payment.amount);
}

#[tokio::test]
async fn test_late_capture_flagged_when_cancellation_refunds_disabled() {
    let h = Harness::without_refund_on_cancel();
    let (booking, payment, checkout_id) = h.open_checkout(4, 16).await;

    let cancelled = h.allocator.cancel_booking(booking.id, 4).await.unwrap();
    h.orchestrator.settle_cancellation(&cancelled).await.unwrap();
    let ack = h.webhooks.handle_event(completed(&checkout_id)).await.unwrap();
    assert_eq!(ack, WebhookAck::LateCapture);

    let payment = h.orchestrator.payment(payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.external_transaction_id.as_deref(), Some("txn_42"));
    assert_eq!(h.processor.refunds.load(Ordering::SeqCst), 0);
    assert_eq!(h.hooks.unreconciled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_capture_of_abandoned_attempt_after_retry_is_refunded() {
    let h = Harness::new();
    let (booking, first, first_checkout) = h.open_checkout(5, 18).await;
    h.orchestrator.cancel_payment(first.id, 5).await.unwrap();

    let retry = h.orchestrator.initiate_payment(booking.id, 5).await.unwrap();
    let checkout = h.orchestrator.begin_checkout(retry.id).await.unwrap();
    let ack = h.webhooks.handle_event(completed(&checkout.checkout_id)).await.unwrap();
    assert_eq!(ack, WebhookAck::Applied);

    // The abandoned checkout was paid too
    let ack = h.webhooks.handle_event(completed(&first_checkout)).await.unwrap();
    assert_eq!(ack, WebhookAck::LateCapture);
    assert_eq!(
        h.orchestrator.payment(first.id).await.unwrap().status,
        PaymentStatus::Refunded
    );
    assert_eq!(
        h.orchestrator.payment(retry.id).await.unwrap().status,
        PaymentStatus::Completed
    );
    assert_eq!(
        h.allocator.booking(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(h.processor.refunds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_capture_after_failure_report_confirms_pending_booking() {
    let h = Harness::new();
    let (booking, payment, checkout_id) = h.open_checkout(6, 19).await;

    let failed = ProcessorEvent {
        event_type: ProcessorEventType::CheckoutExpired,
        checkout_id: checkout_id.clone(),
        transaction_id: None,
    };
    assert_eq!(h.webhooks.handle_event(failed).await.unwrap(), WebhookAck::Applied);

    let ack = h.webhooks.handle_event(completed(&checkout_id)).await.unwrap();
    assert_eq!(ack, WebhookAck::Applied);
    assert_eq!(
        h.orchestrator.payment(payment.id).await.unwrap().status,
        PaymentStatus::Completed
    );
    assert_eq!(
        h.allocator.booking(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(h.processor.refunds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_paid_booking_cannot_be_cancelled_after_start() {
    let h = Harness::new();
    let (booking, payment) = h.paid_booking(7, 16).await;

    // Monday 16:30, half an hour into the session
    let during_session = BookingAllocator::new(
        Arc::new(SlotCatalog::default_template()),
        h.ledger.clone(),
        PricingEngine::new(PricingConfig::default()),
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 10, 19, 16, 30, 0).unwrap())),
        h.hooks.clone(),
    );

    let err = during_session.cancel_booking(booking.id, 7).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidTransition { .. }));

    assert_eq!(
        h.allocator.booking(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(
        h.orchestrator.payment(payment.id).await.unwrap().status,
        PaymentStatus::Completed
    );
    assert!(h.orchestrator.refunds_for(payment.id).await.unwrap().is_empty());
    assert_eq!(h.processor.refunds.load(Ordering::SeqCst), 0);
    assert_eq!(h.hooks.cancelled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invoice_issued_once_per_paid_payment() {
    let h = Harness::new();
    let (_, payment) = h.paid_booking(8, 20).await;
    let billing = BillingDetails {
        billing_name: "Ada Lovelace".into(),
        billing_email: "ada@example.org".into(),
        billing_address: None,
    };

    let err = h
        .orchestrator
        .invoice_for(payment.id, 9, Some(billing.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Forbidden { .. }));

    let invoice = h
        .orchestrator
        .invoice_for(payment.id, 8, Some(billing))
        .await
        .unwrap();
    assert_eq!(invoice.invoice_number, "TH-202610-0001");
    assert_eq!(invoice.amount, payment.amount);
    assert_eq!(invoice.billing.billing_email, "ada@example.org");

    let again = h.orchestrator.invoice_for(payment.id, 8, None).await.unwrap();
    assert_eq!(again.id, invoice.id);
}
