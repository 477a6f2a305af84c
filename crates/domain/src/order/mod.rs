//! Order records and related rules.

mod pricing;
mod reference;
mod status;

pub use pricing::{PricedCart, PricingConfig};
pub use reference::new_reference_number;
pub use status::OrderStatus;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during order operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// Checkout was attempted with an empty cart.
    #[error("cart is empty")]
    EmptyCart,

    /// A line carried a non-positive quantity.
    #[error("invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: i32 },

    /// A product does not have enough stock for the requested quantity.
    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: ProductId },

    /// A product price was negative.
    #[error("invalid price: {price} cents")]
    InvalidPrice { price: i64 },

    /// The requested status transition is not legal.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A status name that is not part of the vocabulary.
    #[error("unknown order status: {status}")]
    UnknownStatus { status: String },

    /// The shipping address reference is missing or nil.
    #[error("invalid shipping address")]
    InvalidAddress,

    /// The payment method tag is not recognised.
    #[error("unknown payment method: {method}")]
    UnknownPaymentMethod { method: String },
}

/// How the customer intends to settle the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Card or wallet payment through the PayU gateway.
    Payu,
    /// Colombian bank debit (PSE) through the gateway.
    Pse,
    /// Cash on delivery.
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Payu => "PAYU",
            PaymentMethod::Pse => "PSE",
            PaymentMethod::Cash => "CASH",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PAYU" => Ok(PaymentMethod::Payu),
            "PSE" => Ok(PaymentMethod::Pse),
            "CASH" => Ok(PaymentMethod::Cash),
            other => Err(OrderError::UnknownPaymentMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// A persisted order.
///
/// Immutable after creation except for `status`, `tracking_number`, the
/// shipping timestamps, and `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    /// Unique human-readable reference, used by the payment gateway.
    pub reference_number: String,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping_cost: Money,
    pub total: Money,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address_id: Uuid,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted order line with the product name and unit price
/// snapshotted at purchase time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Money,
    pub subtotal: Money,
}

/// A fully priced order ready to be persisted atomically.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub reference_number: String,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping_cost: Money,
    pub total: Money,
    pub payment_method: PaymentMethod,
    pub shipping_address_id: Uuid,
    pub notes: Option<String>,
    pub currency: String,
    pub lines: Vec<NewOrderLine>,
}

/// One line of a [`NewOrder`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Money,
    pub subtotal: Money,
}

impl NewOrder {
    /// Builds a new order from a priced cart.
    ///
    /// Generates the order id and unique reference number. Validates the
    /// shipping address reference is present.
    pub fn from_priced_cart(
        user_id: UserId,
        priced: PricedCart,
        payment_method: PaymentMethod,
        shipping_address_id: Uuid,
        notes: Option<String>,
        currency: impl Into<String>,
    ) -> Result<Self, OrderError> {
        if shipping_address_id.is_nil() {
            return Err(OrderError::InvalidAddress);
        }

        Ok(Self {
            id: OrderId::new(),
            user_id,
            reference_number: new_reference_number(),
            subtotal: priced.subtotal,
            tax: priced.tax,
            shipping_cost: priced.shipping_cost,
            total: priced.total,
            payment_method,
            shipping_address_id,
            notes,
            currency: currency.into(),
            lines: priced.lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartLine;

    fn priced_fixture() -> PricedCart {
        let lines = vec![CartLine {
            product_id: ProductId::new(),
            product_name: "Silk robe".to_string(),
            unit_price: Money::from_units(45_000),
            quantity: 2,
            available_stock: 15,
        }];
        PricingConfig::default().price(&lines).unwrap()
    }

    #[test]
    fn test_new_order_rejects_nil_address() {
        let err = NewOrder::from_priced_cart(
            UserId::new(),
            priced_fixture(),
            PaymentMethod::Payu,
            Uuid::nil(),
            None,
            "COP",
        )
        .unwrap_err();
        assert_eq!(err, OrderError::InvalidAddress);
    }

    #[test]
    fn test_new_order_carries_breakdown() {
        let order = NewOrder::from_priced_cart(
            UserId::new(),
            priced_fixture(),
            PaymentMethod::Payu,
            Uuid::new_v4(),
            Some("leave at the gate".to_string()),
            "COP",
        )
        .unwrap();

        assert_eq!(order.total, order.subtotal + order.tax + order.shipping_cost);
        assert!(order.reference_number.starts_with("ORD-"));
        assert_eq!(order.lines.len(), 1);
    }

    #[test]
    fn test_payment_method_roundtrip() {
        for method in [PaymentMethod::Payu, PaymentMethod::Pse, PaymentMethod::Cash] {
            let parsed: PaymentMethod = method.as_str().parse().unwrap();
            assert_eq!(parsed, method);
        }
        assert!("CHEQUE".parse::<PaymentMethod>().is_err());
    }
}
