//! API error types with HTTP response mapping.
//!
//! The engine is the authority on business rules; this module only
//! translates error kinds to transport status codes and a
//! machine-readable reason code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{CatalogError, OrderError};
use engine::{EngineError, WebhookError};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(&'static str),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or invalid credentials.
    Unauthorized(&'static str),
    /// Authenticated but not allowed.
    Forbidden(&'static str),
    /// Engine-level error.
    Engine(EngineError),
    /// Webhook adapter error.
    Webhook(WebhookError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(entity) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{entity} not found"),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.to_string())
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.to_string()),
            ApiError::Engine(err) => engine_error_to_response(err),
            ApiError::Webhook(err) => webhook_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message, "code": code });
        (status, Json(body)).into_response()
    }
}

fn engine_error_to_response(err: EngineError) -> (StatusCode, &'static str, String) {
    match &err {
        EngineError::Order(order_err) => {
            let code = match order_err {
                OrderError::EmptyCart => "EMPTY_CART",
                OrderError::InvalidQuantity { .. } => "INVALID_QUANTITY",
                OrderError::InvalidPrice { .. } => "INVALID_PRICE",
                OrderError::InvalidAddress => "INVALID_ADDRESS",
                OrderError::UnknownPaymentMethod { .. } => "INVALID_PAYMENT_METHOD",
                OrderError::UnknownStatus { .. } => "INVALID_STATUS",
                OrderError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
                OrderError::InvalidTransition { .. } => "INVALID_TRANSITION",
            };
            let status = match order_err {
                OrderError::InsufficientStock { .. } | OrderError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::BAD_REQUEST,
            };
            (status, code, err.to_string())
        }
        EngineError::Catalog(catalog_err) => {
            let code = match catalog_err {
                CatalogError::EmptyName => "INVALID_NAME",
                CatalogError::EmptySlug => "INVALID_SLUG",
                CatalogError::InvalidPrice { .. } => "INVALID_PRICE",
                CatalogError::InvalidStock { .. } => "INVALID_STOCK",
            };
            (StatusCode::BAD_REQUEST, code, err.to_string())
        }
        EngineError::NotFound(entity) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} not found"),
        ),
        EngineError::Store(store_err) => store_error_to_response(store_err),
    }
}

fn store_error_to_response(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::NotFound { entity, .. } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} not found"),
        ),
        StoreError::InsufficientStock { .. } => {
            (StatusCode::CONFLICT, "INSUFFICIENT_STOCK", err.to_string())
        }
        StoreError::StaleStatus { .. } => (
            StatusCode::CONFLICT,
            "CONCURRENT_MODIFICATION",
            err.to_string(),
        ),
        StoreError::AlreadySettled { .. } => {
            (StatusCode::CONFLICT, "ALREADY_SETTLED", err.to_string())
        }
        StoreError::Duplicate { .. } => (StatusCode::CONFLICT, "DUPLICATE", err.to_string()),
        StoreError::Database(_) | StoreError::Serialization(_) | StoreError::CorruptValue { .. } => {
            tracing::error!(error = %err, "storage failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "internal server error".to_string(),
            )
        }
    }
}

fn webhook_error_to_response(err: WebhookError) -> (StatusCode, &'static str, String) {
    match &err {
        WebhookError::Malformed(_) => (StatusCode::BAD_REQUEST, "MALFORMED", err.to_string()),
        WebhookError::InvalidSignature => (
            StatusCode::BAD_REQUEST,
            "INVALID_SIGNATURE",
            err.to_string(),
        ),
        WebhookError::UnknownReference(_) => {
            (StatusCode::NOT_FOUND, "UNKNOWN_REFERENCE", err.to_string())
        }
        WebhookError::Store(store_err) => store_error_to_response(store_err),
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::Webhook(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Engine(EngineError::Store(err))
    }
}
