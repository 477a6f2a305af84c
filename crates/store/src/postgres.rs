//! PostgreSQL-backed storage implementation.
//!
//! Each trait method runs in a single transaction. Status changes use
//! conditional `UPDATE ... WHERE status = ANY($expected)` with a
//! rows-affected check, and stock moves use
//! `UPDATE products SET stock = stock - $n WHERE stock >= $n`, so the
//! database serializes concurrent transitions and decrements.

use async_trait::async_trait;
use chrono::Utc;
use common::{CartId, Money, OrderId, PaymentId, ProductId, ShipmentId, UserId};
use domain::{
    Cart, CartItem, CartLine, NewOrder, NewProduct, NotificationKind, Order, OrderLine,
    OrderStatus, OutboxMessage, OutboxStatus, Payment, PaymentAnomaly, PaymentStatus, Product,
    ProductPatch, Shipment,
};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::storage::{
    OrderFilter, OrderWithDetails, PaymentStats, Settlement, ShipmentDraft, Storage, TrackingItem,
    TrackingView,
};
use crate::{Result, StoreError};

/// PostgreSQL [`Storage`] implementation.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_product(row: &PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get("id")?),
            category_id: row.try_get("category_id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            description: row.try_get("description")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock: row.try_get("stock")?,
            views: row.try_get("views")?,
            conversions: row.try_get("conversions")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let payment_method: String = row.try_get("payment_method")?;
        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id")?),
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            reference_number: row.try_get("reference_number")?,
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            tax: Money::from_cents(row.try_get("tax_cents")?),
            shipping_cost: Money::from_cents(row.try_get("shipping_cost_cents")?),
            total: Money::from_cents(row.try_get("total_cents")?),
            status: status.parse().map_err(|_| StoreError::CorruptValue {
                column: "orders.status",
                value: status.clone(),
            })?,
            payment_method: payment_method.parse().map_err(|_| StoreError::CorruptValue {
                column: "orders.payment_method",
                value: payment_method.clone(),
            })?,
            shipping_address_id: row.try_get("shipping_address_id")?,
            notes: row.try_get("notes")?,
            tracking_number: row.try_get("tracking_number")?,
            shipped_at: row.try_get("shipped_at")?,
            delivered_at: row.try_get("delivered_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order_line(row: &PgRow) -> Result<OrderLine> {
        Ok(OrderLine {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            product_name: row.try_get("product_name")?,
            quantity: row.try_get("quantity")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
        })
    }

    fn row_to_payment(row: &PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            currency: row.try_get("currency")?,
            status: status.parse().map_err(|_| StoreError::CorruptValue {
                column: "payments.status",
                value: status.clone(),
            })?,
            transaction_id: row.try_get("transaction_id")?,
            gateway_response: row.try_get("gateway_response")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_shipment(row: &PgRow) -> Result<Shipment> {
        let status: String = row.try_get("status")?;
        Ok(Shipment {
            id: ShipmentId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            carrier: row.try_get("carrier")?,
            guide_number: row.try_get("guide_number")?,
            status: status.parse().map_err(|_| StoreError::CorruptValue {
                column: "shipments.status",
                value: status.clone(),
            })?,
            estimated_delivery_date: row.try_get("estimated_delivery_date")?,
            tracking_url: row.try_get("tracking_url")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_outbox(row: &PgRow) -> Result<OutboxMessage> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        Ok(OutboxMessage {
            id: row.try_get("id")?,
            kind: kind.parse().map_err(|_| StoreError::CorruptValue {
                column: "notification_outbox.kind",
                value: kind.clone(),
            })?,
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            recipient: UserId::from_uuid(row.try_get("recipient")?),
            payload: row.try_get("payload")?,
            status: status.parse().map_err(|_| StoreError::CorruptValue {
                column: "notification_outbox.status",
                value: status.clone(),
            })?,
            attempts: row.try_get("attempts")?,
            created_at: row.try_get("created_at")?,
            sent_at: row.try_get("sent_at")?,
        })
    }

    fn row_to_anomaly(row: &PgRow) -> Result<PaymentAnomaly> {
        let stored_status: String = row.try_get("stored_status")?;
        Ok(PaymentAnomaly {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            reference_number: row.try_get("reference_number")?,
            stored_status: stored_status.parse().map_err(|_| StoreError::CorruptValue {
                column: "payment_anomalies.stored_status",
                value: stored_status.clone(),
            })?,
            stored_transaction_id: row.try_get("stored_transaction_id")?,
            incoming_state: row.try_get("incoming_state")?,
            incoming_transaction_id: row.try_get("incoming_transaction_id")?,
            payload: row.try_get("payload")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn expected_strs(expected: &[OrderStatus]) -> Vec<String> {
        expected.iter().map(|s| s.as_str().to_string()).collect()
    }

    async fn enqueue_tx(
        tx: &mut Transaction<'_, Postgres>,
        kind: NotificationKind,
        order: &Order,
        extra: serde_json::Value,
    ) -> Result<()> {
        let mut payload = json!({
            "reference_number": order.reference_number,
            "total_cents": order.total.cents(),
        });
        if let (Some(obj), Some(extra_obj)) = (payload.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        sqlx::query(
            r#"
            INSERT INTO notification_outbox (id, kind, order_id, recipient, payload, status, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(kind.as_str())
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(payload)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Releases the stock reserved by an order's lines.
    async fn release_stock_tx(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE products p
            SET stock = p.stock + oi.quantity, updated_at = NOW()
            FROM order_items oi
            WHERE oi.order_id = $1 AND oi.product_id = p.id
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// CAS-cancels the order inside an open transaction and compensates
    /// its stock reservation.
    async fn cancel_order_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: OrderId,
        expected: &[OrderStatus],
    ) -> Result<Order> {
        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'CANCELLED', updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(Self::expected_strs(expected))
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            let actual: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;
            return match actual {
                None => Err(StoreError::not_found("order", id)),
                Some(status) => Err(StoreError::StaleStatus {
                    order_id: id,
                    actual: status.parse().map_err(|_| StoreError::CorruptValue {
                        column: "orders.status",
                        value: status.clone(),
                    })?,
                }),
            };
        };
        let order = Self::row_to_order(&row)?;

        Self::release_stock_tx(tx, id).await?;
        Self::enqueue_tx(tx, NotificationKind::OrderCancelled, &order, json!({})).await?;
        Ok(order)
    }

    async fn lines_for_order(&self, id: OrderId) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, product_name, quantity, unit_price_cents, subtotal_cents
            FROM order_items
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_order_line).collect()
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    // -- Catalog --

    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(
            r#"
            INSERT INTO products (id, category_id, name, slug, description, price_cents, stock, views, conversions, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(ProductId::new().as_uuid())
        .bind(product.category_id)
        .bind(&product.name)
        .bind(&product.slug)
        .bind(&product.description)
        .bind(product.price.cents())
        .bind(product.stock)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("products_slug_key")
            {
                return StoreError::Duplicate {
                    field: "slug",
                    value: product.slug.clone(),
                };
            }
            StoreError::Database(e)
        })?;
        Self::row_to_product(&row)
    }

    async fn update_product(&self, id: ProductId, patch: ProductPatch) -> Result<Product> {
        let row = sqlx::query(
            r#"
            UPDATE products
            SET category_id = COALESCE($2, category_id),
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                price_cents = COALESCE($5, price_cents),
                stock = COALESCE($6, stock),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(patch.category_id)
        .bind(patch.name)
        .bind(patch.description)
        .bind(patch.price.map(|p| p.cents()))
        .bind(patch.stock)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("product", id))?;
        Self::row_to_product(&row)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn list_products(&self, limit: i64, offset: i64) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT * FROM products ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_product).collect()
    }

    async fn record_product_view(&self, id: ProductId) -> Result<()> {
        let result = sqlx::query("UPDATE products SET views = views + 1 WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("product", id));
        }
        Ok(())
    }

    // -- Cart --

    async fn get_or_create_cart(&self, user_id: UserId) -> Result<Cart> {
        sqlx::query(
            r#"
            INSERT INTO carts (id, user_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(CartId::new().as_uuid())
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id, user_id, created_at FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(Cart {
            id: CartId::from_uuid(row.try_get("id")?),
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            created_at: row.try_get("created_at")?,
        })
    }

    async fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartItem> {
        let cart = self.get_or_create_cart(user_id).await?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)")
            .bind(product_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(StoreError::not_found("product", product_id));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO cart_items (id, cart_id, product_id, quantity, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            RETURNING id, cart_id, product_id, quantity, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(cart.id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;

        Ok(CartItem {
            id: row.try_get("id")?,
            cart_id: CartId::from_uuid(row.try_get("cart_id")?),
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn set_cart_item_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Option<CartItem>> {
        if quantity == 0 {
            self.remove_cart_item(user_id, product_id).await?;
            return Ok(None);
        }
        let row = sqlx::query(
            r#"
            UPDATE cart_items ci
            SET quantity = $3
            FROM carts c
            WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.product_id = $2
            RETURNING ci.id, ci.cart_id, ci.product_id, ci.quantity, ci.created_at
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("cart item", product_id))?;

        Ok(Some(CartItem {
            id: row.try_get("id")?,
            cart_id: CartId::from_uuid(row.try_get("cart_id")?),
            product_id: ProductId::from_uuid(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn remove_cart_item(&self, user_id: UserId, product_id: ProductId) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM cart_items ci
            USING carts c
            WHERE ci.cart_id = c.id AND c.user_id = $1 AND ci.product_id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("cart item", product_id));
        }
        Ok(())
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM cart_items ci
            USING carts c
            WHERE ci.cart_id = c.id AND c.user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT ci.product_id, p.name AS product_name, p.price_cents, ci.quantity, p.stock
            FROM cart_items ci
            JOIN carts c ON ci.cart_id = c.id
            JOIN products p ON ci.product_id = p.id
            WHERE c.user_id = $1
            ORDER BY ci.created_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CartLine {
                    product_id: ProductId::from_uuid(row.try_get("product_id")?),
                    product_name: row.try_get("product_name")?,
                    unit_price: Money::from_cents(row.try_get("price_cents")?),
                    quantity: row.try_get("quantity")?,
                    available_stock: row.try_get("stock")?,
                })
            })
            .collect()
    }

    // -- Orders --

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id, lines = order.lines.len()))]
    async fn place_order(&self, order: NewOrder) -> Result<OrderWithDetails> {
        let mut tx = self.pool.begin().await?;

        // Atomic decrement with floor check, per line. Zero rows affected
        // means the product is gone or out of stock; either way the whole
        // transaction aborts.
        for line in &order.lines {
            let result = sqlx::query(
                r#"
                UPDATE products
                SET stock = stock - $1, updated_at = NOW()
                WHERE id = $2 AND stock >= $1
                "#,
            )
            .bind(line.quantity)
            .bind(line.product_id.as_uuid())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)")
                        .bind(line.product_id.as_uuid())
                        .fetch_one(&mut *tx)
                        .await?;
                return Err(if exists {
                    StoreError::InsufficientStock {
                        product_id: line.product_id,
                    }
                } else {
                    StoreError::not_found("product", line.product_id)
                });
            }
        }

        let row = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, reference_number, subtotal_cents, tax_cents,
                                shipping_cost_cents, total_cents, status, payment_method,
                                shipping_address_id, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', $8, $9, $10, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(&order.reference_number)
        .bind(order.subtotal.cents())
        .bind(order.tax.cents())
        .bind(order.shipping_cost.cents())
        .bind(order.total.cents())
        .bind(order.payment_method.as_str())
        .bind(order.shipping_address_id)
        .bind(&order.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_reference_number_key")
            {
                return StoreError::Duplicate {
                    field: "reference_number",
                    value: order.reference_number.clone(),
                };
            }
            StoreError::Database(e)
        })?;
        let record = Self::row_to_order(&row)?;

        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            let row = sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, product_name, quantity,
                                         unit_price_cents, subtotal_cents, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(record.id.as_uuid())
            .bind(line.product_id.as_uuid())
            .bind(&line.product_name)
            .bind(line.quantity)
            .bind(line.unit_price.cents())
            .bind(line.subtotal.cents())
            .fetch_one(&mut *tx)
            .await?;
            lines.push(Self::row_to_order_line(&row)?);
        }

        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount_cents, currency, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'PENDING', NOW(), NOW())
            "#,
        )
        .bind(PaymentId::new().as_uuid())
        .bind(record.id.as_uuid())
        .bind(order.total.cents())
        .bind(&order.currency)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM cart_items ci
            USING carts c
            WHERE ci.cart_id = c.id AND c.user_id = $1
            "#,
        )
        .bind(order.user_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        Self::enqueue_tx(&mut tx, NotificationKind::OrderConfirmed, &record, json!({})).await?;

        tx.commit().await?;
        Ok(OrderWithDetails {
            order: record,
            lines,
            shipment: None,
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderWithDetails>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let order = Self::row_to_order(&row)?;
        let lines = self.lines_for_order(id).await?;
        let shipment = self.get_shipment_for_order(id).await?;
        Ok(Some(OrderWithDetails {
            order,
            lines,
            shipment,
        }))
    }

    async fn find_order_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE reference_number = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.status.map(|s| s.as_str().to_string()))
        .bind(filter.limit.unwrap_or(50))
        .bind(filter.offset.unwrap_or(0))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_order).collect()
    }

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_order).collect()
    }

    async fn transition_order_status(
        &self,
        id: OrderId,
        expected: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Order> {
        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3,
                updated_at = NOW(),
                shipped_at = CASE WHEN $3 = 'SHIPPED' THEN NOW() ELSE shipped_at END,
                delivered_at = CASE WHEN $3 = 'DELIVERED' THEN NOW() ELSE delivered_at END
            WHERE id = $1 AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(Self::expected_strs(expected))
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_order(&row),
            None => {
                let actual: Option<String> =
                    sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                        .bind(id.as_uuid())
                        .fetch_optional(&self.pool)
                        .await?;
                match actual {
                    None => Err(StoreError::not_found("order", id)),
                    Some(status) => Err(StoreError::StaleStatus {
                        order_id: id,
                        actual: status.parse().map_err(|_| StoreError::CorruptValue {
                            column: "orders.status",
                            value: status.clone(),
                        })?,
                    }),
                }
            }
        }
    }

    async fn cancel_order(&self, id: OrderId, expected: &[OrderStatus]) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let order = Self::cancel_order_tx(&mut tx, id, expected).await?;
        tx.commit().await?;
        Ok(order)
    }

    // -- Payments --

    async fn get_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_payment).transpose()
    }

    #[tracing::instrument(skip(self, settlement))]
    async fn settle_payment(&self, order_id: OrderId, settlement: Settlement) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;

        let (new_status, transaction_id, payload, approve) = match settlement {
            Settlement::Approve {
                transaction_id,
                payload,
            } => ("APPROVED", transaction_id, payload, true),
            Settlement::Decline {
                transaction_id,
                payload,
            } => ("DECLINED", transaction_id, payload, false),
        };

        // CAS on the payment: only a PENDING payment can settle, so a
        // concurrent duplicate delivery loses here and re-reads.
        let row = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, transaction_id = $3, gateway_response = $4, updated_at = NOW()
            WHERE order_id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(new_status)
        .bind(&transaction_id)
        .bind(&payload)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let stored: Option<String> =
                sqlx::query_scalar("SELECT status FROM payments WHERE order_id = $1")
                    .bind(order_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            return match stored {
                None => Err(StoreError::not_found("payment", order_id)),
                Some(status) => Err(StoreError::AlreadySettled {
                    order_id,
                    status: status.parse().map_err(|_| StoreError::CorruptValue {
                        column: "payments.status",
                        value: status.clone(),
                    })?,
                }),
            };
        };
        let payment = Self::row_to_payment(&row)?;

        if approve {
            // The order must still be awaiting payment; if an admin
            // cancelled concurrently the whole settlement rolls back.
            let row = sqlx::query(
                r#"
                UPDATE orders
                SET status = 'PAYMENT_CONFIRMED', updated_at = NOW()
                WHERE id = $1 AND status = 'PENDING'
                RETURNING *
                "#,
            )
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                let actual: Option<String> =
                    sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                        .bind(order_id.as_uuid())
                        .fetch_optional(&mut *tx)
                        .await?;
                return match actual {
                    None => Err(StoreError::not_found("order", order_id)),
                    Some(status) => Err(StoreError::StaleStatus {
                        order_id,
                        actual: status.parse().map_err(|_| StoreError::CorruptValue {
                            column: "orders.status",
                            value: status.clone(),
                        })?,
                    }),
                };
            };
            let order = Self::row_to_order(&row)?;

            sqlx::query(
                r#"
                UPDATE products p
                SET conversions = p.conversions + oi.quantity
                FROM order_items oi
                WHERE oi.order_id = $1 AND oi.product_id = p.id
                "#,
            )
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await?;

            Self::enqueue_tx(&mut tx, NotificationKind::PaymentApproved, &order, json!({})).await?;
        } else {
            // Cancel and restock only if the order is still open; an
            // admin cancellation already released the stock.
            let status: String = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
            if status == "PENDING" {
                Self::cancel_order_tx(&mut tx, order_id, &[OrderStatus::Pending]).await?;
            }
        }

        tx.commit().await?;
        Ok(payment)
    }

    async fn list_payments(
        &self,
        status: Option<PaymentStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM payments
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str().to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn payment_stats(&self) -> Result<PaymentStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_transactions,
                COUNT(*) FILTER (WHERE status = 'APPROVED') AS approved_count,
                COUNT(*) FILTER (WHERE status = 'DECLINED') AS declined_count,
                COUNT(*) FILTER (WHERE status = 'PENDING') AS pending_count,
                COALESCE(SUM(amount_cents) FILTER (WHERE status = 'APPROVED'), 0)::BIGINT AS total_revenue_cents
            FROM payments
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let approved_count: i64 = row.try_get("approved_count")?;
        let total_revenue = Money::from_cents(row.try_get("total_revenue_cents")?);
        Ok(PaymentStats {
            total_transactions: row.try_get("total_transactions")?,
            approved_count,
            declined_count: row.try_get("declined_count")?,
            pending_count: row.try_get("pending_count")?,
            total_revenue,
            avg_transaction: (approved_count > 0)
                .then(|| Money::from_cents(total_revenue.cents() / approved_count)),
        })
    }

    async fn record_payment_anomaly(&self, anomaly: PaymentAnomaly) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_anomalies (id, order_id, reference_number, stored_status,
                                           stored_transaction_id, incoming_state,
                                           incoming_transaction_id, payload, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(anomaly.id)
        .bind(anomaly.order_id.as_uuid())
        .bind(&anomaly.reference_number)
        .bind(anomaly.stored_status.as_str())
        .bind(&anomaly.stored_transaction_id)
        .bind(&anomaly.incoming_state)
        .bind(&anomaly.incoming_transaction_id)
        .bind(&anomaly.payload)
        .bind(anomaly.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_payment_anomalies(&self, limit: i64, offset: i64) -> Result<Vec<PaymentAnomaly>> {
        let rows = sqlx::query(
            "SELECT * FROM payment_anomalies ORDER BY recorded_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_anomaly).collect()
    }

    // -- Shipments --

    async fn create_shipment(&self, order_id: OrderId, draft: ShipmentDraft) -> Result<Shipment> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'SHIPPED', tracking_number = $2, shipped_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'CONFIRMED'
            RETURNING *
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(&draft.guide_number)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                    .bind(order_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            return match actual {
                None => Err(StoreError::not_found("order", order_id)),
                Some(status) => Err(StoreError::StaleStatus {
                    order_id,
                    actual: status.parse().map_err(|_| StoreError::CorruptValue {
                        column: "orders.status",
                        value: status.clone(),
                    })?,
                }),
            };
        };
        let order = Self::row_to_order(&row)?;

        let row = sqlx::query(
            r#"
            INSERT INTO shipments (id, order_id, carrier, guide_number, status,
                                   estimated_delivery_date, tracking_url, created_at)
            VALUES ($1, $2, $3, $4, 'IN_TRANSIT', $5, $6, NOW())
            RETURNING *
            "#,
        )
        .bind(ShipmentId::new().as_uuid())
        .bind(order_id.as_uuid())
        .bind(&draft.carrier)
        .bind(&draft.guide_number)
        .bind(draft.estimated_delivery_date)
        .bind(&draft.tracking_url)
        .fetch_one(&mut *tx)
        .await?;
        let shipment = Self::row_to_shipment(&row)?;

        Self::enqueue_tx(
            &mut tx,
            NotificationKind::OrderShipped,
            &order,
            json!({ "tracking_number": shipment.guide_number }),
        )
        .await?;

        tx.commit().await?;
        Ok(shipment)
    }

    async fn get_shipment_for_order(&self, order_id: OrderId) -> Result<Option<Shipment>> {
        let row = sqlx::query("SELECT * FROM shipments WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_shipment).transpose()
    }

    async fn mark_delivered(&self, order_id: OrderId) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'DELIVERED', delivered_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'SHIPPED'
            RETURNING *
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                    .bind(order_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            return match actual {
                None => Err(StoreError::not_found("order", order_id)),
                Some(status) => Err(StoreError::StaleStatus {
                    order_id,
                    actual: status.parse().map_err(|_| StoreError::CorruptValue {
                        column: "orders.status",
                        value: status.clone(),
                    })?,
                }),
            };
        };
        let order = Self::row_to_order(&row)?;

        sqlx::query("UPDATE shipments SET status = 'DELIVERED' WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let tracking = order.tracking_number.clone().unwrap_or_default();
        Self::enqueue_tx(
            &mut tx,
            NotificationKind::OrderDelivered,
            &order,
            json!({ "tracking_number": tracking }),
        )
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn find_tracking(&self, number: &str) -> Result<Option<TrackingView>> {
        let row = sqlx::query(
            r#"
            SELECT o.id AS order_id, o.status, o.shipped_at, o.delivered_at,
                   s.carrier, s.tracking_url, s.estimated_delivery_date
            FROM orders o
            LEFT JOIN shipments s ON s.order_id = o.id
            WHERE o.tracking_number = $1 OR s.guide_number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let order_id: Uuid = row.try_get("order_id")?;
        let status: String = row.try_get("status")?;
        let items = sqlx::query(
            "SELECT product_name, quantity FROM order_items WHERE order_id = $1 ORDER BY created_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|item| {
            Ok(TrackingItem {
                product_name: item.try_get("product_name")?,
                quantity: item.try_get("quantity")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(Some(TrackingView {
            tracking_number: number.to_string(),
            status: status.parse().map_err(|_| StoreError::CorruptValue {
                column: "orders.status",
                value: status.clone(),
            })?,
            shipped_at: row.try_get("shipped_at")?,
            delivered_at: row.try_get("delivered_at")?,
            carrier: row.try_get("carrier")?,
            tracking_url: row.try_get("tracking_url")?,
            estimated_delivery_date: row.try_get("estimated_delivery_date")?,
            items,
        }))
    }

    // -- Notification outbox --

    async fn due_notifications(&self, limit: i64) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notification_outbox
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_notification_sent(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notification_outbox SET status = 'sent', sent_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("outbox message", id));
        }
        Ok(())
    }

    async fn mark_notification_failed(&self, id: Uuid, max_attempts: i32) -> Result<OutboxStatus> {
        let row = sqlx::query(
            r#"
            UPDATE notification_outbox
            SET attempts = attempts + 1,
                status = CASE WHEN attempts + 1 >= $2 THEN 'failed' ELSE status END
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("outbox message", id))?;

        let status: String = row.try_get("status")?;
        status.parse().map_err(|_| StoreError::CorruptValue {
            column: "notification_outbox.status",
            value: status.clone(),
        })
    }
}
