//! Order endpoints: checkout, reads, and the admin lifecycle surface.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Order, OrderLine, OrderStatus, PaymentMethod, Shipment};
use engine::CheckoutInput;
use serde::{Deserialize, Serialize};
use store::{OrderFilter, OrderWithDetails, Storage};
use uuid::Uuid;

use crate::AppState;
use crate::auth::{AdminUser, AuthedUser};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub payment_method: String,
    pub shipping_address_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct AdminListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderSummaryResponse {
    pub id: String,
    pub reference_number: String,
    pub status: OrderStatus,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub shipping_cost_cents: i64,
    pub total_cents: i64,
    pub payment_method: String,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

#[derive(Serialize)]
pub struct ShipmentResponse {
    pub carrier: Option<String>,
    pub guide_number: String,
    pub status: String,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub tracking_url: Option<String>,
}

#[derive(Serialize)]
pub struct OrderDetailResponse {
    #[serde(flatten)]
    pub summary: OrderSummaryResponse,
    pub shipping_address_id: Uuid,
    pub notes: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderLineResponse>,
    pub shipment: Option<ShipmentResponse>,
}

fn summary(order: &Order) -> OrderSummaryResponse {
    OrderSummaryResponse {
        id: order.id.to_string(),
        reference_number: order.reference_number.clone(),
        status: order.status,
        subtotal_cents: order.subtotal.cents(),
        tax_cents: order.tax.cents(),
        shipping_cost_cents: order.shipping_cost.cents(),
        total_cents: order.total.cents(),
        payment_method: order.payment_method.to_string(),
        tracking_number: order.tracking_number.clone(),
        created_at: order.created_at,
        updated_at: order.updated_at,
    }
}

fn line(order_line: &OrderLine) -> OrderLineResponse {
    OrderLineResponse {
        product_id: order_line.product_id.to_string(),
        product_name: order_line.product_name.clone(),
        quantity: order_line.quantity,
        unit_price_cents: order_line.unit_price.cents(),
        subtotal_cents: order_line.subtotal.cents(),
    }
}

fn shipment(record: &Shipment) -> ShipmentResponse {
    ShipmentResponse {
        carrier: record.carrier.clone(),
        guide_number: record.guide_number.clone(),
        status: record.status.to_string(),
        estimated_delivery_date: record.estimated_delivery_date,
        tracking_url: record.tracking_url.clone(),
    }
}

fn detail(details: &OrderWithDetails) -> OrderDetailResponse {
    OrderDetailResponse {
        summary: summary(&details.order),
        shipping_address_id: details.order.shipping_address_id,
        notes: details.order.notes.clone(),
        shipped_at: details.order.shipped_at,
        delivered_at: details.order.delivered_at,
        items: details.lines.iter().map(line).collect(),
        shipment: details.shipment.as_ref().map(shipment),
    }
}

// -- Handlers --

/// POST /orders — checkout: converts the requester's cart into an order.
#[tracing::instrument(skip(state, req), fields(user_id = %user.user_id))]
pub async fn create<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthedUser,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderDetailResponse>), ApiError> {
    let payment_method: PaymentMethod = req
        .payment_method
        .parse()
        .map_err(engine::EngineError::Order)?;

    let placed = state
        .engine
        .create_order(
            user.user_id,
            CheckoutInput {
                payment_method,
                shipping_address_id: req.shipping_address_id,
                notes: req.notes,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(detail(&placed))))
}

/// GET /orders — the requester's own orders.
pub async fn list_own<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<OrderSummaryResponse>>, ApiError> {
    let orders = state
        .engine
        .list_orders(
            user.requester(),
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(orders.iter().map(summary).collect()))
}

/// GET /orders/{id} — a single order, if visible to the requester.
pub async fn get<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetailResponse>, ApiError> {
    let details = state
        .engine
        .get_order(OrderId::from_uuid(id), user.requester())
        .await?;
    Ok(Json(detail(&details)))
}

/// GET /orders/admin/all — admin listing with optional status filter.
pub async fn list_all<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    _admin: AdminUser,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<Vec<OrderSummaryResponse>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(engine::EngineError::Order)?;

    let orders = state
        .engine
        .list_all_orders(OrderFilter {
            status,
            limit: query.limit,
            offset: query.offset,
        })
        .await?;
    Ok(Json(orders.iter().map(summary).collect()))
}

/// PUT /orders/{id}/status — admin status transition.
#[tracing::instrument(skip(state, req), fields(admin = %admin.0.user_id))]
pub async fn set_status<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<OrderSummaryResponse>, ApiError> {
    let target: OrderStatus = req.status.parse().map_err(engine::EngineError::Order)?;
    let order = state
        .engine
        .admin_set_status(OrderId::from_uuid(id), target)
        .await?;
    Ok(Json(summary(&order)))
}
