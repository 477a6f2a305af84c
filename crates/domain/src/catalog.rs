//! Catalog product records.

use chrono::{DateTime, Utc};
use common::{Money, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by catalog validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("product name must not be empty")]
    EmptyName,

    #[error("product slug must not be empty")]
    EmptySlug,

    #[error("invalid price: {price} cents (must be non-negative)")]
    InvalidPrice { price: i64 },

    #[error("invalid stock: {stock} (must be non-negative)")]
    InvalidStock { stock: i32 },
}

/// A catalog product.
///
/// A product referenced by an order line is never deleted; order lines
/// snapshot the name and price instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub category_id: Option<Uuid>,
    pub name: String,
    /// URL slug, unique across the catalog.
    pub slug: String,
    pub description: Option<String>,
    pub price: Money,
    pub stock: i32,
    /// Public read counter, bumped on every catalog view.
    pub views: i64,
    /// Bumped when a payment for an order containing this product is approved.
    pub conversions: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub category_id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: Money,
    pub stock: i32,
}

impl NewProduct {
    /// Validates the input fields.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::EmptyName);
        }
        if self.slug.trim().is_empty() {
            return Err(CatalogError::EmptySlug);
        }
        if self.price.is_negative() {
            return Err(CatalogError::InvalidPrice {
                price: self.price.cents(),
            });
        }
        if self.stock < 0 {
            return Err(CatalogError::InvalidStock { stock: self.stock });
        }
        Ok(())
    }
}

/// Partial update for an existing product. `None` fields are left as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductPatch {
    pub category_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub stock: Option<i32>,
}

impl ProductPatch {
    /// Validates the fields that are present.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if let Some(ref name) = self.name
            && name.trim().is_empty()
        {
            return Err(CatalogError::EmptyName);
        }
        if let Some(price) = self.price
            && price.is_negative()
        {
            return Err(CatalogError::InvalidPrice {
                price: price.cents(),
            });
        }
        if let Some(stock) = self.stock
            && stock < 0
        {
            return Err(CatalogError::InvalidStock { stock });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_product() -> NewProduct {
        NewProduct {
            category_id: None,
            name: "Silk robe".to_string(),
            slug: "silk-robe".to_string(),
            description: None,
            price: Money::from_units(45_000),
            stock: 15,
        }
    }

    #[test]
    fn test_valid_product_passes() {
        assert!(new_product().validate().is_ok());
    }

    #[test]
    fn test_rejects_blank_name() {
        let mut product = new_product();
        product.name = "  ".to_string();
        assert_eq!(product.validate(), Err(CatalogError::EmptyName));
    }

    #[test]
    fn test_rejects_negative_price() {
        let mut product = new_product();
        product.price = Money::from_cents(-1);
        assert_eq!(
            product.validate(),
            Err(CatalogError::InvalidPrice { price: -1 })
        );
    }

    #[test]
    fn test_rejects_negative_stock() {
        let mut product = new_product();
        product.stock = -3;
        assert_eq!(product.validate(), Err(CatalogError::InvalidStock { stock: -3 }));
    }

    #[test]
    fn test_patch_validates_present_fields_only() {
        let patch = ProductPatch {
            price: Some(Money::from_cents(-5)),
            ..ProductPatch::default()
        };
        assert!(patch.validate().is_err());
        assert!(ProductPatch::default().validate().is_ok());
    }
}
