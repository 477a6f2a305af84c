//! HTTP API server for the storefront order engine.
//!
//! Provides the storefront surface (catalog, cart, checkout, tracking)
//! and the back-office surface (order lifecycle, payments, fulfillment),
//! with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use engine::{
    CartService, FulfillmentTracker, GatewayConfig, OrderEngine, PaymentWebhookAdapter,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Storage;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::AuthKeys;
use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Storage> {
    pub engine: OrderEngine<S>,
    pub cart: CartService<S>,
    pub webhooks: PaymentWebhookAdapter<S>,
    pub fulfillment: FulfillmentTracker<S>,
    pub store: S,
    pub auth: AuthKeys,
}

/// Creates the application state from a storage backend and config.
pub fn create_state<S: Storage + Clone>(store: S, config: &Config) -> Arc<AppState<S>> {
    Arc::new(AppState {
        engine: OrderEngine::new(store.clone(), config.pricing(), config.currency.clone()),
        cart: CartService::new(store.clone()),
        webhooks: PaymentWebhookAdapter::new(
            store.clone(),
            GatewayConfig {
                api_key: config.payu_api_key.clone(),
                merchant_id: config.payu_merchant_id.clone(),
                policy: config.webhook_policy(),
            },
        ),
        fulfillment: FulfillmentTracker::new(store.clone()),
        store,
        auth: AuthKeys::new(&config.jwt_secret),
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Storage + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        // Catalog
        .route(
            "/products",
            get(routes::catalog::list::<S>).post(routes::catalog::create::<S>),
        )
        .route(
            "/products/{key}",
            get(routes::catalog::get::<S>).put(routes::catalog::update::<S>),
        )
        // Cart
        .route(
            "/cart",
            get(routes::cart::view::<S>).delete(routes::cart::clear::<S>),
        )
        .route("/cart/items", post(routes::cart::add_item::<S>))
        .route(
            "/cart/items/{productId}",
            put(routes::cart::set_quantity::<S>).delete(routes::cart::remove_item::<S>),
        )
        // Orders
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list_own::<S>),
        )
        .route("/orders/admin/all", get(routes::orders::list_all::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", put(routes::orders::set_status::<S>))
        // Payments
        .route(
            "/payments/order/{orderId}",
            get(routes::payments::get_for_order::<S>),
        )
        .route("/payments/admin/all", get(routes::payments::list::<S>))
        .route("/payments/admin/stats", get(routes::payments::stats::<S>))
        .route(
            "/payments/admin/anomalies",
            get(routes::payments::anomalies::<S>),
        )
        .route(
            "/payments/payu-webhook",
            post(routes::payments::payu_webhook::<S>),
        )
        // Shipping
        .route(
            "/shipping/admin/generate-tracking/{orderId}",
            post(routes::shipping::generate_tracking::<S>),
        )
        .route(
            "/shipping/admin/mark-delivered",
            put(routes::shipping::mark_delivered::<S>),
        )
        .route(
            "/shipping/track/{trackingNumber}",
            get(routes::shipping::track::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
