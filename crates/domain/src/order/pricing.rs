//! Checkout pricing.
//!
//! Orders are always priced from the *current* catalog prices at checkout
//! time, never from prices cached in the cart.

use common::Money;
use serde::{Deserialize, Serialize};

use crate::cart::CartLine;

use super::{NewOrderLine, OrderError};

/// Pricing parameters consumed by checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Tax rate in basis points (1900 = 19% IVA).
    pub tax_rate_basis_points: u32,

    /// Flat shipping cost added to every order.
    pub shipping_cost: Money,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate_basis_points: 1_900,
            shipping_cost: Money::from_units(15_000),
        }
    }
}

/// The monetary breakdown of a cart about to become an order.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedCart {
    pub lines: Vec<NewOrderLine>,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping_cost: Money,
    pub total: Money,
}

impl PricingConfig {
    /// Prices a cart snapshot.
    ///
    /// Rejects empty carts, non-positive quantities, negative prices, and
    /// lines whose requested quantity exceeds the stock observed in the
    /// snapshot. The stock check here is a fast precondition; the store
    /// enforces it again with an atomic decrement at persist time.
    pub fn price(&self, cart: &[CartLine]) -> Result<PricedCart, OrderError> {
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let mut lines = Vec::with_capacity(cart.len());
        let mut subtotal = Money::zero();

        for line in cart {
            if line.quantity <= 0 {
                return Err(OrderError::InvalidQuantity {
                    quantity: line.quantity,
                });
            }
            if line.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    price: line.unit_price.cents(),
                });
            }
            if line.quantity > line.available_stock {
                return Err(OrderError::InsufficientStock {
                    product_id: line.product_id,
                });
            }

            let line_subtotal = line.unit_price.multiply(line.quantity as u32);
            subtotal += line_subtotal;
            lines.push(NewOrderLine {
                product_id: line.product_id,
                product_name: line.product_name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                subtotal: line_subtotal,
            });
        }

        let tax = subtotal.percentage_bp(self.tax_rate_basis_points);
        let total = subtotal + tax + self.shipping_cost;

        Ok(PricedCart {
            lines,
            subtotal,
            tax,
            shipping_cost: self.shipping_cost,
            total,
        })
    }
}
