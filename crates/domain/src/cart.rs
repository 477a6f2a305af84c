//! Cart records.

use chrono::{DateTime, Utc};
use common::{CartId, Money, ProductId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's cart. Created lazily on first use, one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// One product pending purchase in a cart.
///
/// Uniqueness holds per (cart, product): re-adding a product increments
/// the existing item's quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

/// A cart item joined with the current product record.
///
/// This is the checkout input: name, price, and stock reflect the catalog
/// at the moment the cart was loaded, not when items were added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Money,
    pub quantity: i32,
    pub available_stock: i32,
}
