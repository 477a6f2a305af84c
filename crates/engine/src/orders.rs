//! Checkout and order administration.

use common::{OrderId, UserId};
use domain::{NewOrder, Order, OrderError, OrderStatus, PaymentMethod, PricingConfig};
use store::{OrderFilter, OrderWithDetails, Storage, StoreError};

use crate::error::EngineError;

/// The authenticated principal an operation runs as.
///
/// Always derived from verified credentials by the HTTP layer; client
/// bodies never carry user identifiers.
#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Requester {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }
}

/// Checkout request.
#[derive(Debug, Clone)]
pub struct CheckoutInput {
    pub payment_method: PaymentMethod,
    pub shipping_address_id: uuid::Uuid,
    pub notes: Option<String>,
}

/// The order engine: converts carts into orders and guards the order
/// state machine.
pub struct OrderEngine<S> {
    store: S,
    pricing: PricingConfig,
    currency: String,
}

impl<S: Storage> OrderEngine<S> {
    pub fn new(store: S, pricing: PricingConfig, currency: impl Into<String>) -> Self {
        Self {
            store,
            pricing,
            currency: currency.into(),
        }
    }

    /// Creates an order from the requester's current cart.
    ///
    /// Prices with current catalog prices, snapshots name/price per line,
    /// and hands the whole unit (order, lines, stock decrements, pending
    /// payment, cart clear, confirmation notification) to the store to
    /// commit atomically.
    #[tracing::instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        input: CheckoutInput,
    ) -> Result<OrderWithDetails, EngineError> {
        let cart = self.store.load_cart_lines(user_id).await?;
        let priced = self.pricing.price(&cart)?;
        let order = NewOrder::from_priced_cart(
            user_id,
            priced,
            input.payment_method,
            input.shipping_address_id,
            input.notes,
            self.currency.clone(),
        )?;

        let placed = self.store.place_order(order).await.map_err(|e| match e {
            // The atomic decrement lost a race another checkout won.
            StoreError::InsufficientStock { product_id } => {
                EngineError::Order(OrderError::InsufficientStock { product_id })
            }
            other => EngineError::Store(other),
        })?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %placed.order.id,
            reference = %placed.order.reference_number,
            total_cents = placed.order.total.cents(),
            "order created"
        );
        Ok(placed)
    }

    /// Fetches an order visible to the requester.
    ///
    /// Non-admins only see their own orders; anything else is reported as
    /// not found rather than forbidden.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(
        &self,
        id: OrderId,
        requester: Requester,
    ) -> Result<OrderWithDetails, EngineError> {
        let details = self
            .store
            .get_order(id)
            .await?
            .ok_or(EngineError::NotFound("order"))?;
        if !requester.is_admin && details.order.user_id != requester.user_id {
            return Err(EngineError::NotFound("order"));
        }
        Ok(details)
    }

    /// Lists the requester's own orders.
    pub async fn list_orders(
        &self,
        requester: Requester,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, EngineError> {
        Ok(self
            .store
            .list_orders_for_user(requester.user_id, limit, offset)
            .await?)
    }

    /// Admin listing with optional status filter.
    pub async fn list_all_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, EngineError> {
        Ok(self.store.list_orders(filter).await?)
    }

    /// Applies an administrative status transition.
    ///
    /// Legality is checked against the freshly read status and enforced
    /// again by the store's compare-and-swap, so a concurrent transition
    /// (for example a webhook landing mid-request) surfaces as a conflict
    /// instead of a blind overwrite. Cancellation releases the stock the
    /// order reserved.
    #[tracing::instrument(skip(self))]
    pub async fn admin_set_status(
        &self,
        id: OrderId,
        to: OrderStatus,
    ) -> Result<Order, EngineError> {
        let current = self
            .store
            .get_order(id)
            .await?
            .ok_or(EngineError::NotFound("order"))?
            .order
            .status;

        if !current.can_transition_to(to) {
            return Err(EngineError::Order(OrderError::InvalidTransition {
                from: current,
                to,
            }));
        }

        let updated = if to == OrderStatus::Cancelled {
            self.store.cancel_order(id, &[current]).await?
        } else {
            self.store.transition_order_status(id, &[current], to).await?
        };

        metrics::counter!("order_status_transitions_total", "to" => to.as_str()).increment(1);
        tracing::info!(order_id = %id, from = %current, to = %to, "order status updated");
        Ok(updated)
    }
}
