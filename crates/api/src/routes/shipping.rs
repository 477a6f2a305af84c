//! Fulfillment endpoints: admin tracking lifecycle plus the public
//! tracking lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::OrderStatus;
use serde::{Deserialize, Serialize};
use store::{Storage, TrackingView};
use uuid::Uuid;

use crate::AppState;
use crate::auth::AdminUser;
use crate::error::ApiError;

#[derive(Deserialize, Default)]
pub struct GenerateTrackingRequest {
    pub carrier: Option<String>,
}

#[derive(Deserialize)]
pub struct MarkDeliveredRequest {
    pub order_id: Uuid,
    pub tracking_number: Option<String>,
}

#[derive(Serialize)]
pub struct GenerateTrackingResponse {
    pub tracking_number: String,
    pub order_id: String,
    pub already_shipped: bool,
}

#[derive(Serialize)]
pub struct MarkDeliveredResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// POST /shipping/admin/generate-tracking/{orderId} — issue a tracking
/// number and mark the order shipped. Idempotent for orders that already
/// shipped.
#[tracing::instrument(skip(state, req), fields(admin = %admin.0.user_id))]
pub async fn generate_tracking<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    admin: AdminUser,
    Path(order_id): Path<Uuid>,
    req: Option<Json<GenerateTrackingRequest>>,
) -> Result<Json<GenerateTrackingResponse>, ApiError> {
    let carrier = req.and_then(|Json(body)| body.carrier);
    let issued = state
        .fulfillment
        .issue_tracking(OrderId::from_uuid(order_id), carrier)
        .await?;
    Ok(Json(GenerateTrackingResponse {
        tracking_number: issued.tracking_number,
        order_id: order_id.to_string(),
        already_shipped: issued.already_shipped,
    }))
}

/// PUT /shipping/admin/mark-delivered — confirm delivery of a shipped
/// order.
#[tracing::instrument(skip(state, req), fields(admin = %admin.0.user_id))]
pub async fn mark_delivered<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    admin: AdminUser,
    Json(req): Json<MarkDeliveredRequest>,
) -> Result<Json<MarkDeliveredResponse>, ApiError> {
    let order_id = OrderId::from_uuid(req.order_id);

    // When the caller names a tracking number, it must match the order.
    if let Some(ref tracking) = req.tracking_number {
        let shipment = state
            .store
            .get_shipment_for_order(order_id)
            .await?
            .ok_or(ApiError::NotFound("shipment"))?;
        if shipment.guide_number != *tracking {
            return Err(ApiError::BadRequest(format!(
                "tracking number {tracking} does not belong to this order"
            )));
        }
    }

    let order = state.fulfillment.mark_delivered(order_id).await?;
    Ok(Json(MarkDeliveredResponse {
        order_id: order.id.to_string(),
        status: order.status,
        delivered_at: order.delivered_at,
    }))
}

/// GET /shipping/track/{trackingNumber} — public tracking lookup.
///
/// Returns the reduced view only; the not-found body does not reveal
/// whether the number ever existed.
pub async fn track<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    Path(tracking_number): Path<String>,
) -> Result<Json<TrackingView>, ApiError> {
    let view = state
        .fulfillment
        .track(&tracking_number)
        .await?
        .ok_or(ApiError::NotFound("tracking number"))?;
    Ok(Json(view))
}
