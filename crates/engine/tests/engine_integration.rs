//! Integration tests for the order engine over the in-memory store.

use common::{Money, ProductId, UserId};
use domain::{
    GatewayNotification, NewProduct, OrderError, OrderStatus, PaymentStatus, PricingConfig,
    SignatureParams, WebhookPolicy,
};
use engine::{
    CheckoutInput, EngineError, FulfillmentTracker, GatewayConfig, MemoryMailer, OrderEngine,
    OutboxWorker, PaymentWebhookAdapter, Requester, WebhookError, WebhookOutcome,
};
use store::{MemoryStorage, Storage};
use uuid::Uuid;

const API_KEY: &str = "4Vj8eK4rloUd272L48hsrarnUA";
const MERCHANT_ID: &str = "508029";

struct TestHarness {
    store: MemoryStorage,
    engine: OrderEngine<MemoryStorage>,
    webhooks: PaymentWebhookAdapter<MemoryStorage>,
    fulfillment: FulfillmentTracker<MemoryStorage>,
}

impl TestHarness {
    fn new() -> Self {
        let store = MemoryStorage::new();
        let engine = OrderEngine::new(store.clone(), PricingConfig::default(), "COP");
        let webhooks = PaymentWebhookAdapter::new(
            store.clone(),
            GatewayConfig {
                api_key: API_KEY.to_string(),
                merchant_id: MERCHANT_ID.to_string(),
                policy: WebhookPolicy::default(),
            },
        );
        let fulfillment = FulfillmentTracker::new(store.clone());

        Self {
            store,
            engine,
            webhooks,
            fulfillment,
        }
    }

    async fn seed_product(&self, price_units: i64, stock: i32) -> ProductId {
        self.store
            .create_product(NewProduct {
                category_id: None,
                name: "Silk robe".to_string(),
                slug: format!("silk-robe-{}", Uuid::new_v4().simple()),
                description: None,
                price: Money::from_units(price_units),
                stock,
            })
            .await
            .unwrap()
            .id
    }

    async fn checkout(&self, user: UserId, product: ProductId, quantity: i32) -> store::OrderWithDetails {
        self.store.add_cart_item(user, product, quantity).await.unwrap();
        self.engine
            .create_order(
                user,
                CheckoutInput {
                    payment_method: "PAYU".parse().unwrap(),
                    shipping_address_id: Uuid::new_v4(),
                    notes: None,
                },
            )
            .await
            .unwrap()
    }
}

/// Builds a correctly signed notification for an order reference.
fn signed_notification(
    reference: &str,
    state: &str,
    value: &str,
    transaction: Option<&str>,
) -> GatewayNotification {
    let sign = SignatureParams {
        api_key: API_KEY,
        merchant_id: MERCHANT_ID,
        reference_code: reference,
        value,
        currency: "COP",
        state_code: state,
    }
    .expected();

    GatewayNotification {
        reference_code: reference.to_string(),
        state_pol: state.to_string(),
        value: value.to_string(),
        currency: "COP".to_string(),
        reference_pol: transaction.map(str::to_string),
        sign,
    }
}

fn value_string(amount: Money) -> String {
    format!("{}.{:02}", amount.units(), amount.cents_part())
}

#[tokio::test]
async fn test_checkout_prices_reference_scenario() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let user = UserId::new();

    let placed = h.checkout(user, product, 2).await;

    assert_eq!(placed.order.subtotal, Money::from_units(90_000));
    assert_eq!(placed.order.tax, Money::from_units(17_100));
    assert_eq!(placed.order.shipping_cost, Money::from_units(15_000));
    assert_eq!(placed.order.total, Money::from_units(122_100));
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.lines.len(), 1);
    assert_eq!(placed.lines[0].subtotal, Money::from_units(90_000));

    let stored = h.store.get_product(product).await.unwrap().unwrap();
    assert_eq!(stored.stock, 13);

    let payment = h.store.get_payment(placed.order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, Money::from_units(122_100));

    // Checkout consumed the whole cart.
    assert!(h.store.load_cart_lines(user).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_checkout_rejects_empty_cart() {
    let h = TestHarness::new();
    let err = h
        .engine
        .create_order(
            UserId::new(),
            CheckoutInput {
                payment_method: "PAYU".parse().unwrap(),
                shipping_address_id: Uuid::new_v4(),
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Order(OrderError::EmptyCart)));
}

#[tokio::test]
async fn test_checkout_rejects_insufficient_stock() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 3).await;
    let user = UserId::new();
    h.store.add_cart_item(user, product, 5).await.unwrap();

    let err = h
        .engine
        .create_order(
            user,
            CheckoutInput {
                payment_method: "PAYU".parse().unwrap(),
                shipping_address_id: Uuid::new_v4(),
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Order(OrderError::InsufficientStock { .. })
    ));

    // Nothing was applied.
    assert_eq!(h.store.get_product(product).await.unwrap().unwrap().stock, 3);
}

#[tokio::test]
async fn test_webhook_approval_applied_exactly_once_across_redeliveries() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;

    let notification = signed_notification(
        &placed.order.reference_number,
        "4",
        &value_string(placed.order.total),
        Some("pol-7001"),
    );

    // Delivered three times: applied once, then no-op duplicates.
    assert_eq!(
        h.webhooks.handle_webhook(notification.clone()).await.unwrap(),
        WebhookOutcome::Applied
    );
    assert_eq!(
        h.webhooks.handle_webhook(notification.clone()).await.unwrap(),
        WebhookOutcome::Duplicate
    );
    assert_eq!(
        h.webhooks.handle_webhook(notification).await.unwrap(),
        WebhookOutcome::Duplicate
    );

    let order = h
        .engine
        .get_order(placed.order.id, Requester::admin(UserId::new()))
        .await
        .unwrap()
        .order;
    assert_eq!(order.status, OrderStatus::PaymentConfirmed);

    let payment = h.store.get_payment(placed.order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert_eq!(payment.transaction_id.as_deref(), Some("pol-7001"));

    // Conversion counters bumped once, not three times.
    let stored = h.store.get_product(product).await.unwrap().unwrap();
    assert_eq!(stored.conversions, 2);
    assert_eq!(h.store.anomaly_count().await, 0);
}

#[tokio::test]
async fn test_webhook_decline_cancels_and_restores_stock() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;
    assert_eq!(h.store.get_product(product).await.unwrap().unwrap().stock, 13);

    let notification = signed_notification(
        &placed.order.reference_number,
        "5",
        &value_string(placed.order.total),
        Some("pol-7002"),
    );
    assert_eq!(
        h.webhooks.handle_webhook(notification).await.unwrap(),
        WebhookOutcome::Applied
    );

    let order = h.store.get_order(placed.order.id).await.unwrap().unwrap().order;
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(h.store.get_product(product).await.unwrap().unwrap().stock, 15);
}

#[tokio::test]
async fn test_webhook_invalid_signature_rejected_without_mutation() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;

    let mut notification = signed_notification(
        &placed.order.reference_number,
        "4",
        &value_string(placed.order.total),
        Some("pol-7003"),
    );
    notification.sign = "0000000000000000000000000000000000000000000000000000000000000000".to_string();

    let err = h.webhooks.handle_webhook(notification).await.unwrap_err();
    assert!(matches!(err, WebhookError::InvalidSignature));

    let payment = h.store.get_payment(placed.order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    let order = h.store.get_order(placed.order.id).await.unwrap().unwrap().order;
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_webhook_tampered_amount_fails_verification() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;

    // Signature was computed over a different amount than the payload
    // carries.
    let mut notification = signed_notification(
        &placed.order.reference_number,
        "4",
        &value_string(placed.order.total),
        None,
    );
    notification.value = "1.00".to_string();

    let err = h.webhooks.handle_webhook(notification).await.unwrap_err();
    assert!(matches!(err, WebhookError::InvalidSignature));
}

#[tokio::test]
async fn test_webhook_unknown_reference() {
    let h = TestHarness::new();
    let notification = signed_notification("ORD-0-DEADBEEF", "4", "122100.00", None);
    let err = h.webhooks.handle_webhook(notification).await.unwrap_err();
    assert!(matches!(err, WebhookError::UnknownReference(_)));
}

#[tokio::test]
async fn test_webhook_pending_state_is_acknowledged_without_effect() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;

    let notification = signed_notification(
        &placed.order.reference_number,
        "6",
        &value_string(placed.order.total),
        None,
    );
    assert_eq!(
        h.webhooks.handle_webhook(notification).await.unwrap(),
        WebhookOutcome::Ignored
    );

    let payment = h.store.get_payment(placed.order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_webhook_conflicting_redelivery_records_anomaly() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;
    let value = value_string(placed.order.total);

    let first = signed_notification(&placed.order.reference_number, "4", &value, Some("pol-A"));
    assert_eq!(
        h.webhooks.handle_webhook(first).await.unwrap(),
        WebhookOutcome::Applied
    );

    // Same outcome but a different gateway transaction id: never
    // silently overwritten.
    let second = signed_notification(&placed.order.reference_number, "4", &value, Some("pol-B"));
    assert_eq!(
        h.webhooks.handle_webhook(second).await.unwrap(),
        WebhookOutcome::AnomalyRecorded
    );

    assert_eq!(h.store.anomaly_count().await, 1);
    let payment = h.store.get_payment(placed.order.id).await.unwrap().unwrap();
    assert_eq!(payment.transaction_id.as_deref(), Some("pol-A"));

    let anomalies = h.store.list_payment_anomalies(10, 0).await.unwrap();
    assert_eq!(anomalies[0].incoming_transaction_id.as_deref(), Some("pol-B"));
    assert_eq!(anomalies[0].stored_status, PaymentStatus::Approved);
}

#[tokio::test]
async fn test_webhook_refund_state_is_surfaced_not_applied() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;
    let value = value_string(placed.order.total);

    let approve = signed_notification(&placed.order.reference_number, "4", &value, Some("pol-A"));
    h.webhooks.handle_webhook(approve).await.unwrap();

    let refund = signed_notification(&placed.order.reference_number, "14", &value, Some("pol-A"));
    assert_eq!(
        h.webhooks.handle_webhook(refund).await.unwrap(),
        WebhookOutcome::AnomalyRecorded
    );

    // Payment remains approved; the refund waits for an operator.
    let payment = h.store.get_payment(placed.order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert_eq!(h.store.anomaly_count().await, 1);
}

#[tokio::test]
async fn test_order_visibility_never_leaks_existence() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let owner = UserId::new();
    let placed = h.checkout(owner, product, 1).await;

    // The owner sees it.
    assert!(h.engine.get_order(placed.order.id, Requester::user(owner)).await.is_ok());

    // A different user gets NotFound, not Forbidden.
    let err = h
        .engine
        .get_order(placed.order.id, Requester::user(UserId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound("order")));

    // An admin sees any order.
    assert!(
        h.engine
            .get_order(placed.order.id, Requester::admin(UserId::new()))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_admin_set_status_enforces_state_machine() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;

    // Pending cannot jump straight to Shipped.
    let err = h
        .engine
        .admin_set_status(placed.order.id, OrderStatus::Shipped)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Order(OrderError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Shipped,
        })
    ));

    // Cancellation from Pending releases the reserved stock.
    h.engine
        .admin_set_status(placed.order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(h.store.get_product(product).await.unwrap().unwrap().stock, 15);

    // Terminal: no further transitions.
    let err = h
        .engine
        .admin_set_status(placed.order.id, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Order(OrderError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_fulfillment_flow_with_idempotent_tracking() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;
    let value = value_string(placed.order.total);

    let approve = signed_notification(&placed.order.reference_number, "4", &value, Some("pol-A"));
    h.webhooks.handle_webhook(approve).await.unwrap();
    h.engine
        .admin_set_status(placed.order.id, OrderStatus::Confirmed)
        .await
        .unwrap();

    // Issuing before Confirmed would have failed; now it ships.
    let issued = h
        .fulfillment
        .issue_tracking(placed.order.id, Some("Servientrega".to_string()))
        .await
        .unwrap();
    assert!(!issued.already_shipped);
    assert!(issued.tracking_number.starts_with("TRK-"));

    // Re-issuing returns the same number without a second shipment.
    let again = h
        .fulfillment
        .issue_tracking(placed.order.id, None)
        .await
        .unwrap();
    assert!(again.already_shipped);
    assert_eq!(again.tracking_number, issued.tracking_number);

    // Public view carries items and dates but no customer identity.
    let view = h
        .fulfillment
        .track(&issued.tracking_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, OrderStatus::Shipped);
    assert_eq!(view.items.len(), 1);
    let json = serde_json::to_value(&view).unwrap();
    assert!(json.get("user_id").is_none());
    assert!(json.get("customer_name").is_none());
    assert!(json.get("customer_email").is_none());

    let delivered = h.fulfillment.mark_delivered(placed.order.id).await.unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(delivered.delivered_at.is_some());

    // Delivered is terminal.
    let err = h.fulfillment.mark_delivered(placed.order.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Order(OrderError::InvalidTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Delivered,
        })
    ));
}

#[tokio::test]
async fn test_issue_tracking_requires_confirmed_order() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 1).await;

    let err = h
        .fulfillment
        .issue_tracking(placed.order.id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Order(OrderError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Shipped,
        })
    ));
}

#[tokio::test]
async fn test_unknown_tracking_number_reveals_nothing() {
    let h = TestHarness::new();
    let view = h.fulfillment.track("TRK-0-FFFFFFFF").await.unwrap();
    assert!(view.is_none());
}

#[tokio::test]
async fn test_outbox_worker_delivers_and_retries() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;
    let placed = h.checkout(UserId::new(), product, 2).await;
    let value = value_string(placed.order.total);
    let approve = signed_notification(&placed.order.reference_number, "4", &value, None);
    h.webhooks.handle_webhook(approve).await.unwrap();

    // Checkout and approval queued two notifications.
    let mailer = MemoryMailer::new();
    let worker = OutboxWorker::new(h.store.clone(), mailer.clone()).with_max_attempts(3);

    // Transport down: nothing sends, rows stay pending for retry.
    mailer.set_fail_on_send(true).await;
    assert_eq!(worker.drain_once().await.unwrap(), 0);
    assert_eq!(mailer.sent_count().await, 0);

    // Transport back: the same rows deliver.
    mailer.set_fail_on_send(false).await;
    assert_eq!(worker.drain_once().await.unwrap(), 2);
    assert_eq!(mailer.sent_count().await, 2);

    // Nothing left to deliver.
    assert_eq!(worker.drain_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_mail_failures_never_block_the_transition() {
    let h = TestHarness::new();
    let product = h.seed_product(45_000, 15).await;

    // The checkout commits regardless of any mail transport state: the
    // notification is only a pending outbox row at this point.
    let placed = h.checkout(UserId::new(), product, 1).await;
    assert_eq!(placed.order.status, OrderStatus::Pending);

    let mailer = MemoryMailer::new();
    mailer.set_fail_on_send(true).await;
    let worker = OutboxWorker::new(h.store.clone(), mailer.clone()).with_max_attempts(2);

    // Exhaust the retry budget; the row parks as failed and the order is
    // untouched.
    worker.drain_once().await.unwrap();
    worker.drain_once().await.unwrap();
    let order = h.store.get_order(placed.order.id).await.unwrap().unwrap().order;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(h.store.outbox_count(domain::OutboxStatus::Failed).await, 1);
}

#[tokio::test]
async fn test_concurrent_checkouts_exhaust_stock_exactly() {
    let h = TestHarness::new();
    let product = h.seed_product(20_000, 5).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = h.store.clone();
        let engine = OrderEngine::new(store.clone(), PricingConfig::default(), "COP");
        handles.push(tokio::spawn(async move {
            let user = UserId::new();
            store.add_cart_item(user, product, 1).await.unwrap();
            engine
                .create_order(
                    user,
                    CheckoutInput {
                        payment_method: "PAYU".parse().unwrap(),
                        shipping_address_id: Uuid::new_v4(),
                        notes: None,
                    },
                )
                .await
        }));
    }

    let mut ok = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Order(OrderError::InsufficientStock { .. })) => insufficient += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(ok, 5);
    assert_eq!(insufficient, 5);
    assert_eq!(h.store.get_product(product).await.unwrap().unwrap().stock, 0);
}
