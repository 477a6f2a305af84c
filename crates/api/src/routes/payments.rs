//! Payment endpoints: the gateway webhook plus user/admin views.

use std::sync::Arc;

use axum::extract::{Form, Path, Query, State};
use axum::{Json, http::StatusCode};
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{GatewayNotification, Payment, PaymentAnomaly, PaymentStatus};
use engine::WebhookOutcome;
use serde::{Deserialize, Serialize};
use store::{PaymentStats, Storage};
use uuid::Uuid;

use crate::AppState;
use crate::auth::{AdminUser, AuthedUser};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            order_id: payment.order_id.to_string(),
            amount_cents: payment.amount.cents(),
            currency: payment.currency,
            status: payment.status,
            transaction_id: payment.transaction_id,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct AnomalyResponse {
    pub id: Uuid,
    pub order_id: String,
    pub reference_number: String,
    pub stored_status: PaymentStatus,
    pub stored_transaction_id: Option<String>,
    pub incoming_state: String,
    pub incoming_transaction_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<PaymentAnomaly> for AnomalyResponse {
    fn from(anomaly: PaymentAnomaly) -> Self {
        Self {
            id: anomaly.id,
            order_id: anomaly.order_id.to_string(),
            reference_number: anomaly.reference_number,
            stored_status: anomaly.stored_status,
            stored_transaction_id: anomaly.stored_transaction_id,
            incoming_state: anomaly.incoming_state,
            incoming_transaction_id: anomaly.incoming_transaction_id,
            recorded_at: anomaly.recorded_at,
        }
    }
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: &'static str,
}

/// GET /payments/order/{orderId} — the payment record for an order the
/// requester may see.
pub async fn get_for_order<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthedUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let order_id = OrderId::from_uuid(order_id);
    // Visibility first: a foreign order reads as not-found.
    state.engine.get_order(order_id, user.requester()).await?;

    let payment = state
        .store
        .get_payment(order_id)
        .await?
        .ok_or(ApiError::NotFound("payment"))?;
    Ok(Json(payment.into()))
}

/// GET /payments/admin/all — admin listing with optional status filter.
pub async fn list<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PaymentResponse>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<PaymentStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let payments = state
        .store
        .list_payments(status, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(payments.into_iter().map(Into::into).collect()))
}

/// GET /payments/admin/stats — aggregate settlement figures.
pub async fn stats<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminUser,
) -> Result<Json<PaymentStats>, ApiError> {
    Ok(Json(state.store.payment_stats().await?))
}

/// GET /payments/admin/anomalies — flagged webhook deliveries awaiting
/// operator review.
pub async fn anomalies<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AnomalyResponse>>, ApiError> {
    let anomalies = state
        .store
        .list_payment_anomalies(query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(anomalies.into_iter().map(Into::into).collect()))
}

/// POST /payments/payu-webhook — gateway confirmation callback.
///
/// The gateway delivers form-encoded payloads at least once and expects
/// a 200 for anything verified and structurally valid, regardless of the
/// business outcome; only malformed/unverifiable payloads get a client
/// error so the gateway alerts an operator instead of redelivering
/// forever.
pub async fn payu_webhook<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    Form(notification): Form<GatewayNotification>,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiError> {
    let outcome = state.webhooks.handle_webhook(notification).await?;
    let message = match outcome {
        WebhookOutcome::Applied => "webhook processed",
        WebhookOutcome::Ignored => "webhook acknowledged",
        WebhookOutcome::Duplicate => "duplicate delivery ignored",
        WebhookOutcome::AnomalyRecorded => "delivery recorded for review",
    };
    Ok((StatusCode::OK, Json(WebhookResponse { message })))
}
