//! Catalog endpoints: public browsing plus admin CRUD.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{Money, ProductId};
use domain::{NewProduct, Product, ProductPatch};
use serde::{Deserialize, Serialize};
use store::Storage;
use uuid::Uuid;

use crate::AppState;
use crate::auth::AdminUser;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub category_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub stock: i32,
}

#[derive(Deserialize)]
pub struct UpdateProductRequest {
    pub category_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub stock: Option<i32>,
}

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub stock: i32,
    pub views: i64,
    pub conversions: i64,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.to_string(),
            category_id: product.category_id,
            name: product.name,
            slug: product.slug,
            description: product.description,
            price_cents: product.price.cents(),
            stock: product.stock,
            views: product.views,
            conversions: product.conversions,
        }
    }
}

/// GET /products — public catalog listing.
pub async fn list<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let products = state
        .store
        .list_products(query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(products.into_iter().map(Into::into).collect()))
}

/// GET /products/{key} — public product view by slug (or id), bumps the
/// view counter.
pub async fn get<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    Path(key): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product = match state.store.get_product_by_slug(&key).await? {
        Some(product) => Some(product),
        None => match Uuid::parse_str(&key) {
            Ok(id) => state.store.get_product(ProductId::from_uuid(id)).await?,
            Err(_) => None,
        },
    };
    let product = product.ok_or(ApiError::NotFound("product"))?;

    state.store.record_product_view(product.id).await?;
    Ok(Json(product.into()))
}

/// POST /products — admin: create a product.
#[tracing::instrument(skip(state, req), fields(admin = %admin.0.user_id))]
pub async fn create<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    admin: AdminUser,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let new_product = NewProduct {
        category_id: req.category_id,
        name: req.name,
        slug: req.slug,
        description: req.description,
        price: Money::from_cents(req.price_cents),
        stock: req.stock,
    };
    new_product
        .validate()
        .map_err(engine::EngineError::Catalog)?;

    let product = state.store.create_product(new_product).await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// PUT /products/{key} — admin: partial update (including stock).
#[tracing::instrument(skip(state, req), fields(admin = %admin.0.user_id))]
pub async fn update<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    admin: AdminUser,
    Path(key): Path<String>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id = Uuid::parse_str(&key)
        .map(ProductId::from_uuid)
        .map_err(|_| ApiError::BadRequest(format!("invalid product id: {key}")))?;

    let patch = ProductPatch {
        category_id: req.category_id,
        name: req.name,
        description: req.description,
        price: req.price_cents.map(Money::from_cents),
        stock: req.stock,
    };
    patch.validate().map_err(engine::EngineError::Catalog)?;

    let product = state.store.update_product(id, patch).await?;
    Ok(Json(product.into()))
}
