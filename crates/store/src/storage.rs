//! The [`Storage`] trait: the system's transactional boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use domain::{
    Cart, CartItem, CartLine, NewOrder, NewProduct, Order, OrderLine, OrderStatus, OutboxMessage,
    OutboxStatus, Payment, PaymentAnomaly, PaymentStatus, Product, ProductPatch, Shipment,
};
use uuid::Uuid;

use crate::Result;

/// An order joined with its lines and shipment.
#[derive(Debug, Clone)]
pub struct OrderWithDetails {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    pub shipment: Option<Shipment>,
}

/// Admin listing filter.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// How to settle a PENDING payment.
///
/// `Decline` cancels the order and releases its reserved stock in the
/// same unit, because stock was decremented when the order was placed.
#[derive(Debug, Clone)]
pub enum Settlement {
    Approve {
        transaction_id: Option<String>,
        payload: serde_json::Value,
    },
    Decline {
        transaction_id: Option<String>,
        payload: serde_json::Value,
    },
}

/// Input for issuing a shipment.
#[derive(Debug, Clone)]
pub struct ShipmentDraft {
    pub guide_number: String,
    pub carrier: Option<String>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub tracking_url: Option<String>,
}

/// One item row of the public tracking view.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TrackingItem {
    pub product_name: String,
    pub quantity: i32,
}

/// The reduced, PII-free view returned by the public tracking lookup.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackingView {
    pub tracking_number: String,
    pub status: OrderStatus,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub carrier: Option<String>,
    pub tracking_url: Option<String>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub items: Vec<TrackingItem>,
}

/// Aggregate payment figures for the admin dashboard.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PaymentStats {
    pub total_transactions: i64,
    pub approved_count: i64,
    pub declined_count: i64,
    pub pending_count: i64,
    pub total_revenue: Money,
    pub avg_transaction: Option<Money>,
}

/// The persistence boundary.
///
/// Every method commits atomically: either all of its effects are visible
/// afterwards, or none are. Methods taking an `expected` status set apply
/// a compare-and-swap against the stored status and return
/// [`StoreError::StaleStatus`](crate::StoreError::StaleStatus) when the
/// row moved underneath the caller.
#[async_trait]
pub trait Storage: Send + Sync {
    // -- Catalog --

    async fn create_product(&self, product: NewProduct) -> Result<Product>;

    async fn update_product(&self, id: ProductId, patch: ProductPatch) -> Result<Product>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>>;

    async fn list_products(&self, limit: i64, offset: i64) -> Result<Vec<Product>>;

    /// Atomically bumps the product's view counter.
    async fn record_product_view(&self, id: ProductId) -> Result<()>;

    // -- Cart --

    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart>;

    /// Adds `quantity` of a product to the user's cart. If the product is
    /// already present the existing item's quantity is incremented.
    async fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartItem>;

    /// Sets an item's quantity; `0` removes the item.
    async fn set_cart_item_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Option<CartItem>>;

    async fn remove_cart_item(&self, user_id: UserId, product_id: ProductId) -> Result<()>;

    async fn clear_cart(&self, user_id: UserId) -> Result<()>;

    /// Loads the user's cart joined with current product name/price/stock.
    async fn load_cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>>;

    // -- Orders --

    /// Persists a priced order as one unit: order row, lines, per-product
    /// stock decrements (`stock = stock - q` guarded by `stock >= q`), the
    /// PENDING payment with amount = total, cart clear, and the
    /// order-confirmed outbox row. A failed stock guard aborts everything
    /// with [`StoreError::InsufficientStock`](crate::StoreError::InsufficientStock).
    async fn place_order(&self, order: NewOrder) -> Result<OrderWithDetails>;

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderWithDetails>>;

    async fn find_order_by_reference(&self, reference: &str) -> Result<Option<Order>>;

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>>;

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>>;

    /// CAS-transitions an order's status. Does not release stock; use
    /// [`cancel_order`](Storage::cancel_order) for transitions to
    /// `Cancelled`.
    async fn transition_order_status(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Order>;

    /// CAS-transitions an order to `Cancelled`, releases the stock its
    /// lines reserved, and enqueues the cancellation notification — one
    /// unit.
    async fn cancel_order(&self, id: OrderId, expected: &[OrderStatus]) -> Result<Order>;

    // -- Payments --

    async fn get_payment(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Settles the order's PENDING payment — one unit.
    ///
    /// Approve: payment → APPROVED with transaction id and archived
    /// payload, order `Pending → PaymentConfirmed`, product conversion
    /// counters bumped, payment-approved outbox row.
    ///
    /// Decline: payment → DECLINED with archived payload, order →
    /// `Cancelled`, stock released, order-cancelled outbox row.
    ///
    /// Returns [`StoreError::AlreadySettled`](crate::StoreError::AlreadySettled)
    /// when the payment left PENDING concurrently; the caller re-reads and
    /// re-decides (idempotent webhook handling relies on this).
    async fn settle_payment(&self, order_id: OrderId, settlement: Settlement) -> Result<Payment>;

    async fn list_payments(
        &self,
        status: Option<PaymentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Payment>>;

    async fn payment_stats(&self) -> Result<PaymentStats>;

    async fn record_payment_anomaly(&self, anomaly: PaymentAnomaly) -> Result<()>;

    async fn list_payment_anomalies(&self, limit: i64, offset: i64) -> Result<Vec<PaymentAnomaly>>;

    // -- Shipments --

    /// Issues a shipment — one unit: CAS order `Confirmed → Shipped`,
    /// stamp `shipped_at` and the tracking number, insert the shipment
    /// row, enqueue the shipped notification.
    async fn create_shipment(&self, order_id: OrderId, draft: ShipmentDraft) -> Result<Shipment>;

    async fn get_shipment_for_order(&self, order_id: OrderId) -> Result<Option<Shipment>>;

    /// CAS order `Shipped → Delivered`, stamp `delivered_at`, flip the
    /// shipment to delivered, enqueue the delivery notification — one
    /// unit.
    async fn mark_delivered(&self, order_id: OrderId) -> Result<Order>;

    /// Public tracking lookup by order tracking number or carrier guide
    /// number. Returns only non-PII fields.
    async fn find_tracking(&self, number: &str) -> Result<Option<TrackingView>>;

    // -- Notification outbox --

    /// Returns up to `limit` pending notifications, oldest first.
    async fn due_notifications(&self, limit: i64) -> Result<Vec<OutboxMessage>>;

    async fn mark_notification_sent(&self, id: Uuid) -> Result<()>;

    /// Records a failed delivery attempt. Once `max_attempts` is reached
    /// the row is parked as failed; otherwise it stays pending for the
    /// next poll. Returns the resulting status.
    async fn mark_notification_failed(&self, id: Uuid, max_attempts: i32) -> Result<OutboxStatus>;
}
