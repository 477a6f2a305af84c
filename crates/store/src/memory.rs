//! In-memory storage implementation for tests and demos.
//!
//! A single `RwLock` over the whole state makes every trait method
//! trivially atomic: the write guard is held for the full unit, so
//! concurrent callers observe either all of a unit's effects or none.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CartId, Money, OrderId, PaymentId, ProductId, ShipmentId, UserId};
use domain::{
    Cart, CartItem, CartLine, NewOrder, NewProduct, NotificationKind, Order, OrderLine,
    OrderStatus, OutboxMessage, OutboxStatus, Payment, PaymentAnomaly, PaymentStatus, Product,
    ProductPatch, Shipment, ShipmentStatus,
};
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::storage::{
    OrderFilter, OrderWithDetails, PaymentStats, Settlement, ShipmentDraft, Storage, TrackingItem,
    TrackingView,
};
use crate::{Result, StoreError};

#[derive(Default)]
struct State {
    products: HashMap<ProductId, Product>,
    carts: HashMap<UserId, Cart>,
    cart_items: Vec<CartItem>,
    orders: HashMap<OrderId, Order>,
    order_lines: Vec<OrderLine>,
    payments: HashMap<OrderId, Payment>,
    shipments: HashMap<OrderId, Shipment>,
    anomalies: Vec<PaymentAnomaly>,
    outbox: Vec<OutboxMessage>,
}

/// In-memory [`Storage`] implementation.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows currently in the outbox, per status.
    pub async fn outbox_count(&self, status: OutboxStatus) -> usize {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .filter(|m| m.status == status)
            .count()
    }

    /// Returns the number of recorded payment anomalies.
    pub async fn anomaly_count(&self) -> usize {
        self.state.read().await.anomalies.len()
    }
}

fn enqueue(state: &mut State, kind: NotificationKind, order: &Order, extra: serde_json::Value) {
    let mut payload = json!({
        "reference_number": order.reference_number,
        "total_cents": order.total.cents(),
    });
    if let (Some(obj), Some(extra_obj)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    state.outbox.push(OutboxMessage {
        id: Uuid::new_v4(),
        kind,
        order_id: order.id,
        recipient: order.user_id,
        payload,
        status: OutboxStatus::Pending,
        attempts: 0,
        created_at: Utc::now(),
        sent_at: None,
    });
}

fn release_stock(state: &mut State, order_id: OrderId) {
    let restock: Vec<(ProductId, i32)> = state
        .order_lines
        .iter()
        .filter(|l| l.order_id == order_id)
        .map(|l| (l.product_id, l.quantity))
        .collect();
    for (product_id, quantity) in restock {
        if let Some(product) = state.products.get_mut(&product_id) {
            product.stock += quantity;
            product.updated_at = Utc::now();
        }
    }
}

fn cancel_order_locked(state: &mut State, id: OrderId, expected: &[OrderStatus]) -> Result<Order> {
    let order = state
        .orders
        .get_mut(&id)
        .ok_or_else(|| StoreError::not_found("order", id))?;
    if !expected.contains(&order.status) {
        return Err(StoreError::StaleStatus {
            order_id: id,
            actual: order.status,
        });
    }
    order.status = OrderStatus::Cancelled;
    order.updated_at = Utc::now();
    let snapshot = order.clone();

    release_stock(state, id);
    enqueue(state, NotificationKind::OrderCancelled, &snapshot, json!({}));
    Ok(snapshot)
}

#[async_trait]
impl Storage for MemoryStorage {
    // -- Catalog --

    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        let mut state = self.state.write().await;
        if state.products.values().any(|p| p.slug == product.slug) {
            return Err(StoreError::Duplicate {
                field: "slug",
                value: product.slug,
            });
        }
        let now = Utc::now();
        let record = Product {
            id: ProductId::new(),
            category_id: product.category_id,
            name: product.name,
            slug: product.slug,
            description: product.description,
            price: product.price,
            stock: product.stock,
            views: 0,
            conversions: 0,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_product(&self, id: ProductId, patch: ProductPatch) -> Result<Product> {
        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("product", id))?;
        if let Some(category_id) = patch.category_id {
            product.category_id = Some(category_id);
        }
        if let Some(name) = patch.name {
            product.name = name;
        }
        if let Some(description) = patch.description {
            product.description = Some(description);
        }
        if let Some(price) = patch.price {
            product.price = price;
        }
        if let Some(stock) = patch.stock {
            product.stock = stock;
        }
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        Ok(self
            .state
            .read()
            .await
            .products
            .values()
            .find(|p| p.slug == slug)
            .cloned())
    }

    async fn list_products(&self, limit: i64, offset: i64) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn record_product_view(&self, id: ProductId) -> Result<()> {
        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("product", id))?;
        product.views += 1;
        Ok(())
    }

    // -- Cart --

    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart> {
        let mut state = self.state.write().await;
        let cart = state.carts.entry(user_id).or_insert_with(|| Cart {
            id: CartId::new(),
            user_id,
            created_at: Utc::now(),
        });
        Ok(cart.clone())
    }

    async fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartItem> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(&product_id) {
            return Err(StoreError::not_found("product", product_id));
        }
        let cart_id = state
            .carts
            .entry(user_id)
            .or_insert_with(|| Cart {
                id: CartId::new(),
                user_id,
                created_at: Utc::now(),
            })
            .id;

        if let Some(item) = state
            .cart_items
            .iter_mut()
            .find(|i| i.cart_id == cart_id && i.product_id == product_id)
        {
            item.quantity += quantity;
            return Ok(item.clone());
        }

        let item = CartItem {
            id: Uuid::new_v4(),
            cart_id,
            product_id,
            quantity,
            created_at: Utc::now(),
        };
        state.cart_items.push(item.clone());
        Ok(item)
    }

    async fn set_cart_item_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Option<CartItem>> {
        let mut state = self.state.write().await;
        let cart_id = state
            .carts
            .get(&user_id)
            .map(|c| c.id)
            .ok_or_else(|| StoreError::not_found("cart", user_id))?;

        let position = state
            .cart_items
            .iter()
            .position(|i| i.cart_id == cart_id && i.product_id == product_id)
            .ok_or_else(|| StoreError::not_found("cart item", product_id))?;

        if quantity == 0 {
            state.cart_items.remove(position);
            return Ok(None);
        }
        let item = &mut state.cart_items[position];
        item.quantity = quantity;
        Ok(Some(item.clone()))
    }

    async fn remove_cart_item(&self, user_id: UserId, product_id: ProductId) -> Result<()> {
        let mut state = self.state.write().await;
        let cart_id = state
            .carts
            .get(&user_id)
            .map(|c| c.id)
            .ok_or_else(|| StoreError::not_found("cart", user_id))?;
        let before = state.cart_items.len();
        state
            .cart_items
            .retain(|i| !(i.cart_id == cart_id && i.product_id == product_id));
        if state.cart_items.len() == before {
            return Err(StoreError::not_found("cart item", product_id));
        }
        Ok(())
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(cart_id) = state.carts.get(&user_id).map(|c| c.id) {
            state.cart_items.retain(|i| i.cart_id != cart_id);
        }
        Ok(())
    }

    async fn load_cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let state = self.state.read().await;
        let Some(cart_id) = state.carts.get(&user_id).map(|c| c.id) else {
            return Ok(Vec::new());
        };
        let mut lines = Vec::new();
        for item in state.cart_items.iter().filter(|i| i.cart_id == cart_id) {
            let product = state
                .products
                .get(&item.product_id)
                .ok_or_else(|| StoreError::not_found("product", item.product_id))?;
            lines.push(CartLine {
                product_id: product.id,
                product_name: product.name.clone(),
                unit_price: product.price,
                quantity: item.quantity,
                available_stock: product.stock,
            });
        }
        Ok(lines)
    }

    // -- Orders --

    async fn place_order(&self, order: NewOrder) -> Result<OrderWithDetails> {
        let mut state = self.state.write().await;

        // Stock guard first: nothing is applied unless every line fits.
        for line in &order.lines {
            let product = state
                .products
                .get(&line.product_id)
                .ok_or_else(|| StoreError::not_found("product", line.product_id))?;
            if product.stock < line.quantity {
                return Err(StoreError::InsufficientStock {
                    product_id: line.product_id,
                });
            }
        }

        let now = Utc::now();
        let record = Order {
            id: order.id,
            user_id: order.user_id,
            reference_number: order.reference_number.clone(),
            subtotal: order.subtotal,
            tax: order.tax,
            shipping_cost: order.shipping_cost,
            total: order.total,
            status: OrderStatus::Pending,
            payment_method: order.payment_method,
            shipping_address_id: order.shipping_address_id,
            notes: order.notes.clone(),
            tracking_number: None,
            shipped_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };

        let lines: Vec<OrderLine> = order
            .lines
            .iter()
            .map(|l| OrderLine {
                id: Uuid::new_v4(),
                order_id: record.id,
                product_id: l.product_id,
                product_name: l.product_name.clone(),
                quantity: l.quantity,
                unit_price: l.unit_price,
                subtotal: l.subtotal,
            })
            .collect();

        for line in &order.lines {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.stock -= line.quantity;
                product.updated_at = now;
            }
        }

        let payment = Payment {
            id: PaymentId::new(),
            order_id: record.id,
            amount: order.total,
            currency: order.currency.clone(),
            status: PaymentStatus::Pending,
            transaction_id: None,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        };

        state.orders.insert(record.id, record.clone());
        state.order_lines.extend(lines.clone());
        state.payments.insert(record.id, payment);

        if let Some(cart_id) = state.carts.get(&order.user_id).map(|c| c.id) {
            state.cart_items.retain(|i| i.cart_id != cart_id);
        }

        enqueue(&mut state, NotificationKind::OrderConfirmed, &record, json!({}));

        Ok(OrderWithDetails {
            order: record,
            lines,
            shipment: None,
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderWithDetails>> {
        let state = self.state.read().await;
        let Some(order) = state.orders.get(&id).cloned() else {
            return Ok(None);
        };
        let lines = state
            .order_lines
            .iter()
            .filter(|l| l.order_id == id)
            .cloned()
            .collect();
        let shipment = state.shipments.get(&id).cloned();
        Ok(Some(OrderWithDetails {
            order,
            lines,
            shipment,
        }))
    }

    async fn find_order_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.reference_number == reference)
            .cloned())
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(50).max(0) as usize;
        Ok(orders.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn transition_order_status(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("order", id))?;
        if !expected.contains(&order.status) {
            return Err(StoreError::StaleStatus {
                order_id: id,
                actual: order.status,
            });
        }
        let now = Utc::now();
        order.status = to;
        order.updated_at = now;
        match to {
            OrderStatus::Shipped => order.shipped_at = Some(now),
            OrderStatus::Delivered => order.delivered_at = Some(now),
            _ => {}
        }
        Ok(order.clone())
    }

    async fn cancel_order(&self, id: OrderId, expected: &[OrderStatus]) -> Result<Order> {
        let mut state = self.state.write().await;
        cancel_order_locked(&mut state, id, expected)
    }

    // -- Payments --

    async fn get_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&order_id).cloned())
    }

    async fn settle_payment(&self, order_id: OrderId, settlement: Settlement) -> Result<Payment> {
        let mut state = self.state.write().await;

        let payment = state
            .payments
            .get(&order_id)
            .ok_or_else(|| StoreError::not_found("payment", order_id))?;
        if payment.status != PaymentStatus::Pending {
            return Err(StoreError::AlreadySettled {
                order_id,
                status: payment.status,
            });
        }
        let order_status = state
            .orders
            .get(&order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?
            .status;

        let now = Utc::now();
        match settlement {
            Settlement::Approve {
                transaction_id,
                payload,
            } => {
                // The order must still be awaiting payment: if an admin
                // cancelled concurrently the approval cannot apply.
                if order_status != OrderStatus::Pending {
                    return Err(StoreError::StaleStatus {
                        order_id,
                        actual: order_status,
                    });
                }
                let order = state
                    .orders
                    .get_mut(&order_id)
                    .ok_or_else(|| StoreError::not_found("order", order_id))?;
                order.status = OrderStatus::PaymentConfirmed;
                order.updated_at = now;
                let snapshot = order.clone();

                let conversions: Vec<(ProductId, i32)> = state
                    .order_lines
                    .iter()
                    .filter(|l| l.order_id == order_id)
                    .map(|l| (l.product_id, l.quantity))
                    .collect();
                for (product_id, quantity) in conversions {
                    if let Some(product) = state.products.get_mut(&product_id) {
                        product.conversions += quantity as i64;
                    }
                }

                let payment = state
                    .payments
                    .get_mut(&order_id)
                    .ok_or_else(|| StoreError::not_found("payment", order_id))?;
                payment.status = PaymentStatus::Approved;
                payment.transaction_id = transaction_id;
                payment.gateway_response = Some(payload);
                payment.updated_at = now;
                let settled = payment.clone();

                enqueue(&mut state, NotificationKind::PaymentApproved, &snapshot, json!({}));
                Ok(settled)
            }
            Settlement::Decline {
                transaction_id,
                payload,
            } => {
                let payment = state
                    .payments
                    .get_mut(&order_id)
                    .ok_or_else(|| StoreError::not_found("payment", order_id))?;
                payment.status = PaymentStatus::Declined;
                payment.transaction_id = transaction_id;
                payment.gateway_response = Some(payload);
                payment.updated_at = now;
                let settled = payment.clone();

                // Cancel and restock only if the order is still open; an
                // admin cancellation already released the stock.
                if order_status == OrderStatus::Pending {
                    cancel_order_locked(&mut state, order_id, &[OrderStatus::Pending])?;
                }
                Ok(settled)
            }
        }
    }

    async fn list_payments(
        &self,
        status: Option<PaymentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn payment_stats(&self) -> Result<PaymentStats> {
        let state = self.state.read().await;
        let mut stats = PaymentStats {
            total_transactions: 0,
            approved_count: 0,
            declined_count: 0,
            pending_count: 0,
            total_revenue: Money::zero(),
            avg_transaction: None,
        };
        for payment in state.payments.values() {
            stats.total_transactions += 1;
            match payment.status {
                PaymentStatus::Approved => {
                    stats.approved_count += 1;
                    stats.total_revenue += payment.amount;
                }
                PaymentStatus::Declined => stats.declined_count += 1,
                PaymentStatus::Pending => stats.pending_count += 1,
            }
        }
        if stats.approved_count > 0 {
            stats.avg_transaction = Some(Money::from_cents(
                stats.total_revenue.cents() / stats.approved_count,
            ));
        }
        Ok(stats)
    }

    async fn record_payment_anomaly(&self, anomaly: PaymentAnomaly) -> Result<()> {
        self.state.write().await.anomalies.push(anomaly);
        Ok(())
    }

    async fn list_payment_anomalies(&self, limit: i64, offset: i64) -> Result<Vec<PaymentAnomaly>> {
        let state = self.state.read().await;
        Ok(state
            .anomalies
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    // -- Shipments --

    async fn create_shipment(&self, order_id: OrderId, draft: ShipmentDraft) -> Result<Shipment> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        if order.status != OrderStatus::Confirmed {
            return Err(StoreError::StaleStatus {
                order_id,
                actual: order.status,
            });
        }
        let now = Utc::now();
        order.status = OrderStatus::Shipped;
        order.tracking_number = Some(draft.guide_number.clone());
        order.shipped_at = Some(now);
        order.updated_at = now;
        let snapshot = order.clone();

        let shipment = Shipment {
            id: ShipmentId::new(),
            order_id,
            carrier: draft.carrier,
            guide_number: draft.guide_number,
            status: ShipmentStatus::InTransit,
            estimated_delivery_date: draft.estimated_delivery_date,
            tracking_url: draft.tracking_url,
            created_at: now,
        };
        state.shipments.insert(order_id, shipment.clone());

        enqueue(
            &mut state,
            NotificationKind::OrderShipped,
            &snapshot,
            json!({ "tracking_number": shipment.guide_number }),
        );
        Ok(shipment)
    }

    async fn get_shipment_for_order(&self, order_id: OrderId) -> Result<Option<Shipment>> {
        Ok(self.state.read().await.shipments.get(&order_id).cloned())
    }

    async fn mark_delivered(&self, order_id: OrderId) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        if order.status != OrderStatus::Shipped {
            return Err(StoreError::StaleStatus {
                order_id,
                actual: order.status,
            });
        }
        let now = Utc::now();
        order.status = OrderStatus::Delivered;
        order.delivered_at = Some(now);
        order.updated_at = now;
        let snapshot = order.clone();

        if let Some(shipment) = state.shipments.get_mut(&order_id) {
            shipment.status = ShipmentStatus::Delivered;
        }

        let tracking = snapshot.tracking_number.clone().unwrap_or_default();
        enqueue(
            &mut state,
            NotificationKind::OrderDelivered,
            &snapshot,
            json!({ "tracking_number": tracking }),
        );
        Ok(snapshot)
    }

    async fn find_tracking(&self, number: &str) -> Result<Option<TrackingView>> {
        let state = self.state.read().await;
        let order = state.orders.values().find(|o| {
            o.tracking_number.as_deref() == Some(number)
                || state
                    .shipments
                    .get(&o.id)
                    .is_some_and(|s| s.guide_number == number)
        });
        let Some(order) = order else {
            return Ok(None);
        };
        let shipment = state.shipments.get(&order.id);
        let items = state
            .order_lines
            .iter()
            .filter(|l| l.order_id == order.id)
            .map(|l| TrackingItem {
                product_name: l.product_name.clone(),
                quantity: l.quantity,
            })
            .collect();
        Ok(Some(TrackingView {
            tracking_number: number.to_string(),
            status: order.status,
            shipped_at: order.shipped_at,
            delivered_at: order.delivered_at,
            carrier: shipment.and_then(|s| s.carrier.clone()),
            tracking_url: shipment.and_then(|s| s.tracking_url.clone()),
            estimated_delivery_date: shipment.and_then(|s| s.estimated_delivery_date),
            items,
        }))
    }

    // -- Notification outbox --

    async fn due_notifications(&self, limit: i64) -> Result<Vec<OutboxMessage>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|m| m.status == OutboxStatus::Pending)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_notification_sent(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::not_found("outbox message", id))?;
        message.status = OutboxStatus::Sent;
        message.sent_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_notification_failed(&self, id: Uuid, max_attempts: i32) -> Result<OutboxStatus> {
        let mut state = self.state.write().await;
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::not_found("outbox message", id))?;
        message.attempts += 1;
        if message.attempts >= max_attempts {
            message.status = OutboxStatus::Failed;
        }
        Ok(message.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use domain::{NewOrderLine, PaymentMethod};

    fn product(name: &str, slug: &str, price_units: i64, stock: i32) -> NewProduct {
        NewProduct {
            category_id: None,
            name: name.to_string(),
            slug: slug.to_string(),
            description: None,
            price: Money::from_units(price_units),
            stock,
        }
    }

    fn new_order_for(user: UserId, product: &Product, quantity: i32) -> NewOrder {
        let subtotal = product.price.multiply(quantity as u32);
        let tax = subtotal.percentage_bp(1_900);
        let shipping = Money::from_units(15_000);
        NewOrder {
            id: OrderId::new(),
            user_id: user,
            reference_number: domain::new_reference_number(),
            subtotal,
            tax,
            shipping_cost: shipping,
            total: subtotal + tax + shipping,
            payment_method: PaymentMethod::Payu,
            shipping_address_id: Uuid::new_v4(),
            notes: None,
            currency: "COP".to_string(),
            lines: vec![NewOrderLine {
                product_id: product.id,
                product_name: product.name.clone(),
                quantity,
                unit_price: product.price,
                subtotal,
            }],
        }
    }

    #[tokio::test]
    async fn test_place_order_decrements_stock_and_creates_payment() {
        let store = MemoryStorage::new();
        let product = store
            .create_product(product("Silk robe", "silk-robe", 45_000, 15))
            .await
            .unwrap();
        let user = UserId::new();

        let placed = store
            .place_order(new_order_for(user, &product, 2))
            .await
            .unwrap();

        assert_eq!(placed.order.status, OrderStatus::Pending);
        let stored = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 13);

        let payment = store.get_payment(placed.order.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.amount, placed.order.total);
        assert_eq!(store.outbox_count(OutboxStatus::Pending).await, 1);
    }

    #[tokio::test]
    async fn test_place_order_insufficient_stock_leaves_no_partial_state() {
        let store = MemoryStorage::new();
        let product = store
            .create_product(product("Candle", "candle", 10_000, 1))
            .await
            .unwrap();
        let user = UserId::new();

        let err = store
            .place_order(new_order_for(user, &product, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { .. }));

        let stored = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 1);
        assert!(store.list_orders(OrderFilter::default()).await.unwrap().is_empty());
        assert_eq!(store.outbox_count(OutboxStatus::Pending).await, 0);
    }

    #[tokio::test]
    async fn test_settle_approve_transitions_order() {
        let store = MemoryStorage::new();
        let product = store
            .create_product(product("Robe", "robe", 45_000, 15))
            .await
            .unwrap();
        let placed = store
            .place_order(new_order_for(UserId::new(), &product, 2))
            .await
            .unwrap();

        let settled = store
            .settle_payment(
                placed.order.id,
                Settlement::Approve {
                    transaction_id: Some("txn-1".to_string()),
                    payload: json!({"state_pol": "4"}),
                },
            )
            .await
            .unwrap();

        assert_eq!(settled.status, PaymentStatus::Approved);
        let order = store.get_order(placed.order.id).await.unwrap().unwrap().order;
        assert_eq!(order.status, OrderStatus::PaymentConfirmed);

        let stored = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(stored.conversions, 2);

        // A second settlement attempt is rejected, not overwritten.
        let err = store
            .settle_payment(
                placed.order.id,
                Settlement::Approve {
                    transaction_id: Some("txn-2".to_string()),
                    payload: json!({}),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadySettled { .. }));
    }

    #[tokio::test]
    async fn test_settle_decline_cancels_and_restocks() {
        let store = MemoryStorage::new();
        let product = store
            .create_product(product("Robe", "robe", 45_000, 15))
            .await
            .unwrap();
        let placed = store
            .place_order(new_order_for(UserId::new(), &product, 2))
            .await
            .unwrap();
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 13);

        store
            .settle_payment(
                placed.order.id,
                Settlement::Decline {
                    transaction_id: Some("txn-1".to_string()),
                    payload: json!({"state_pol": "5"}),
                },
            )
            .await
            .unwrap();

        let order = store.get_order(placed.order.id).await.unwrap().unwrap().order;
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 15);
    }

    #[tokio::test]
    async fn test_decline_after_admin_cancel_does_not_restock_twice() {
        let store = MemoryStorage::new();
        let product = store
            .create_product(product("Robe", "robe", 45_000, 15))
            .await
            .unwrap();
        let placed = store
            .place_order(new_order_for(UserId::new(), &product, 2))
            .await
            .unwrap();

        store
            .cancel_order(placed.order.id, &[OrderStatus::Pending])
            .await
            .unwrap();
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 15);

        store
            .settle_payment(
                placed.order.id,
                Settlement::Decline {
                    transaction_id: None,
                    payload: json!({}),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 15);
    }

    #[tokio::test]
    async fn test_transition_cas_rejects_stale_status() {
        let store = MemoryStorage::new();
        let product = store
            .create_product(product("Robe", "robe", 45_000, 15))
            .await
            .unwrap();
        let placed = store
            .place_order(new_order_for(UserId::new(), &product, 1))
            .await
            .unwrap();

        let err = store
            .transition_order_status(
                placed.order.id,
                &[OrderStatus::PaymentConfirmed],
                OrderStatus::Confirmed,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StaleStatus {
                actual: OrderStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_shipment_flow_and_tracking_view() {
        let store = MemoryStorage::new();
        let product = store
            .create_product(product("Robe", "robe", 45_000, 15))
            .await
            .unwrap();
        let placed = store
            .place_order(new_order_for(UserId::new(), &product, 2))
            .await
            .unwrap();

        store
            .settle_payment(
                placed.order.id,
                Settlement::Approve {
                    transaction_id: None,
                    payload: json!({}),
                },
            )
            .await
            .unwrap();
        store
            .transition_order_status(
                placed.order.id,
                &[OrderStatus::PaymentConfirmed],
                OrderStatus::Confirmed,
            )
            .await
            .unwrap();

        let shipment = store
            .create_shipment(
                placed.order.id,
                ShipmentDraft {
                    guide_number: "TRK-1-ABCDEF01".to_string(),
                    carrier: Some("Servientrega".to_string()),
                    estimated_delivery_date: None,
                    tracking_url: None,
                },
            )
            .await
            .unwrap();

        let view = store
            .find_tracking(&shipment.guide_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.status, OrderStatus::Shipped);
        assert_eq!(view.items, vec![TrackingItem {
            product_name: "Robe".to_string(),
            quantity: 2
        }]);
        assert!(view.shipped_at.is_some());

        store.mark_delivered(placed.order.id).await.unwrap();
        let view = store
            .find_tracking(&shipment.guide_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.status, OrderStatus::Delivered);
        assert!(view.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_cart_add_increments_existing_item() {
        let store = MemoryStorage::new();
        let product = store
            .create_product(product("Robe", "robe", 45_000, 15))
            .await
            .unwrap();
        let user = UserId::new();

        store.add_cart_item(user, product.id, 1).await.unwrap();
        let item = store.add_cart_item(user, product.id, 2).await.unwrap();
        assert_eq!(item.quantity, 3);

        let lines = store.load_cart_lines(user).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_outbox_retry_budget() {
        let store = MemoryStorage::new();
        let product = store
            .create_product(product("Robe", "robe", 45_000, 15))
            .await
            .unwrap();
        store
            .place_order(new_order_for(UserId::new(), &product, 1))
            .await
            .unwrap();

        let due = store.due_notifications(10).await.unwrap();
        assert_eq!(due.len(), 1);
        let id = due[0].id;

        assert_eq!(
            store.mark_notification_failed(id, 3).await.unwrap(),
            OutboxStatus::Pending
        );
        assert_eq!(
            store.mark_notification_failed(id, 3).await.unwrap(),
            OutboxStatus::Pending
        );
        assert_eq!(
            store.mark_notification_failed(id, 3).await.unwrap(),
            OutboxStatus::Failed
        );
        assert!(store.due_notifications(10).await.unwrap().is_empty());
    }
}
