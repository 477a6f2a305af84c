//! Fulfillment: tracking numbers, delivery confirmation, public lookup.

use common::OrderId;
use domain::{Order, OrderError, OrderStatus, Shipment, new_tracking_number};
use store::{ShipmentDraft, Storage, StoreError, TrackingView};

use crate::error::EngineError;

/// Result of issuing (or re-requesting) a tracking number.
#[derive(Debug, Clone)]
pub struct IssuedTracking {
    pub tracking_number: String,
    pub shipment: Shipment,
    /// True when the order had already shipped and the existing tracking
    /// number was returned instead of generating a second one.
    pub already_shipped: bool,
}

/// Drives orders through shipping and delivery.
pub struct FulfillmentTracker<S> {
    store: S,
}

impl<S: Storage> FulfillmentTracker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Issues a tracking number for a confirmed order and marks it
    /// shipped.
    ///
    /// Idempotent: invoking again for an order that already shipped
    /// returns the existing tracking number without creating a second
    /// shipment. Any other status is an invalid transition.
    #[tracing::instrument(skip(self))]
    pub async fn issue_tracking(
        &self,
        order_id: OrderId,
        carrier: Option<String>,
    ) -> Result<IssuedTracking, EngineError> {
        let details = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(EngineError::NotFound("order"))?;

        match details.order.status {
            OrderStatus::Shipped | OrderStatus::Delivered => {
                return self.existing_tracking(order_id).await;
            }
            OrderStatus::Confirmed => {}
            other => {
                return Err(EngineError::Order(OrderError::InvalidTransition {
                    from: other,
                    to: OrderStatus::Shipped,
                }));
            }
        }

        let draft = ShipmentDraft {
            guide_number: new_tracking_number(),
            carrier,
            estimated_delivery_date: None,
            tracking_url: None,
        };

        match self.store.create_shipment(order_id, draft).await {
            Ok(shipment) => {
                metrics::counter!("shipments_issued_total").increment(1);
                tracing::info!(
                    order_id = %order_id,
                    tracking = %shipment.guide_number,
                    "tracking number issued"
                );
                Ok(IssuedTracking {
                    tracking_number: shipment.guide_number.clone(),
                    shipment,
                    already_shipped: false,
                })
            }
            // A concurrent invocation shipped the order first; fall back
            // to its tracking number.
            Err(StoreError::StaleStatus {
                actual: OrderStatus::Shipped | OrderStatus::Delivered,
                ..
            }) => self.existing_tracking(order_id).await,
            Err(StoreError::StaleStatus { actual, .. }) => {
                Err(EngineError::Order(OrderError::InvalidTransition {
                    from: actual,
                    to: OrderStatus::Shipped,
                }))
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn existing_tracking(&self, order_id: OrderId) -> Result<IssuedTracking, EngineError> {
        let shipment = self
            .store
            .get_shipment_for_order(order_id)
            .await?
            .ok_or(EngineError::NotFound("shipment"))?;
        Ok(IssuedTracking {
            tracking_number: shipment.guide_number.clone(),
            shipment,
            already_shipped: true,
        })
    }

    /// Confirms delivery of a shipped order.
    #[tracing::instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: OrderId) -> Result<Order, EngineError> {
        match self.store.mark_delivered(order_id).await {
            Ok(order) => {
                metrics::counter!("deliveries_confirmed_total").increment(1);
                tracing::info!(order_id = %order_id, "order delivered");
                Ok(order)
            }
            Err(StoreError::StaleStatus { actual, .. }) => {
                Err(EngineError::Order(OrderError::InvalidTransition {
                    from: actual,
                    to: OrderStatus::Delivered,
                }))
            }
            Err(StoreError::NotFound { .. }) => Err(EngineError::NotFound("order")),
            Err(other) => Err(other.into()),
        }
    }

    /// Public tracking lookup by tracking or carrier guide number.
    ///
    /// Returns the reduced view only — shipment status, dates, carrier,
    /// and item names/quantities. Customer identity never appears here.
    pub async fn track(&self, number: &str) -> Result<Option<TrackingView>, EngineError> {
        Ok(self.store.find_tracking(number).await?)
    }
}
