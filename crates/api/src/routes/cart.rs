//! Cart endpoints, all owner-scoped.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::ProductId;
use domain::CartLine;
use serde::{Deserialize, Serialize};
use store::Storage;
use uuid::Uuid;

use crate::AppState;
use crate::auth::AuthedUser;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i32,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
    pub available_stock: i32,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub items: Vec<CartItemResponse>,
    pub total_cents: i64,
    pub item_count: usize,
}

fn line_to_response(line: CartLine) -> CartItemResponse {
    CartItemResponse {
        product_id: line.product_id.to_string(),
        product_name: line.product_name,
        unit_price_cents: line.unit_price.cents(),
        quantity: line.quantity,
        available_stock: line.available_stock,
    }
}

/// GET /cart — the requester's cart at current prices.
pub async fn view<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthedUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.cart.view(user.user_id).await?;
    Ok(Json(CartResponse {
        total_cents: cart.total.cents(),
        item_count: cart.item_count,
        items: cart.items.into_iter().map(line_to_response).collect(),
    }))
}

/// POST /cart/items — add a product (increments if already present).
pub async fn add_item<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthedUser,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    state
        .cart
        .add_item(user.user_id, ProductId::from_uuid(req.product_id), req.quantity)
        .await?;
    view(State(state), user).await
}

/// PUT /cart/items/{productId} — set quantity; 0 removes the item.
pub async fn set_quantity<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthedUser,
    Path(product_id): Path<Uuid>,
    Json(req): Json<SetQuantityRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    state
        .cart
        .set_quantity(user.user_id, ProductId::from_uuid(product_id), req.quantity)
        .await?;
    view(State(state), user).await
}

/// DELETE /cart/items/{productId} — remove one item.
pub async fn remove_item<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthedUser,
    Path(product_id): Path<Uuid>,
) -> Result<Json<CartResponse>, ApiError> {
    state
        .cart
        .remove_item(user.user_id, ProductId::from_uuid(product_id))
        .await?;
    view(State(state), user).await
}

/// DELETE /cart — empty the cart.
pub async fn clear<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthedUser,
) -> Result<Json<CartResponse>, ApiError> {
    state.cart.clear(user.user_id).await?;
    view(State(state), user).await
}
