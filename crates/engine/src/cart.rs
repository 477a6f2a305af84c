//! Cart ledger operations.

use common::{Money, ProductId, UserId};
use domain::{CartItem, CartLine, OrderError};
use store::Storage;

use crate::error::EngineError;

/// A user's cart with current catalog pricing.
#[derive(Debug, Clone)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub total: Money,
    pub item_count: usize,
}

/// Owner-scoped cart operations.
pub struct CartService<S> {
    store: S,
}

impl<S: Storage> CartService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the user's cart priced at current catalog prices.
    pub async fn view(&self, user_id: UserId) -> Result<CartView, EngineError> {
        let items = self.store.load_cart_lines(user_id).await?;
        let total = items
            .iter()
            .map(|line| line.unit_price.multiply(line.quantity as u32))
            .sum();
        Ok(CartView {
            item_count: items.len(),
            total,
            items,
        })
    }

    /// Adds a product to the cart; re-adding increments the quantity.
    ///
    /// The stock check covers the resulting cart quantity, so a cart can
    /// never request more than the catalog currently holds. Checkout
    /// re-validates against live stock anyway.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartItem, EngineError> {
        if quantity <= 0 {
            return Err(EngineError::Order(OrderError::InvalidQuantity { quantity }));
        }
        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or(EngineError::NotFound("product"))?;

        let existing = self
            .store
            .load_cart_lines(user_id)
            .await?
            .into_iter()
            .find(|line| line.product_id == product_id)
            .map(|line| line.quantity)
            .unwrap_or(0);

        if existing + quantity > product.stock {
            return Err(EngineError::Order(OrderError::InsufficientStock {
                product_id,
            }));
        }

        Ok(self.store.add_cart_item(user_id, product_id, quantity).await?)
    }

    /// Sets an item's quantity; `0` removes the item.
    #[tracing::instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Option<CartItem>, EngineError> {
        if quantity < 0 {
            return Err(EngineError::Order(OrderError::InvalidQuantity { quantity }));
        }
        if quantity > 0 {
            let product = self
                .store
                .get_product(product_id)
                .await?
                .ok_or(EngineError::NotFound("product"))?;
            if quantity > product.stock {
                return Err(EngineError::Order(OrderError::InsufficientStock {
                    product_id,
                }));
            }
        }
        Ok(self
            .store
            .set_cart_item_quantity(user_id, product_id, quantity)
            .await?)
    }

    pub async fn remove_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<(), EngineError> {
        Ok(self.store.remove_cart_item(user_id, product_id).await?)
    }

    pub async fn clear(&self, user_id: UserId) -> Result<(), EngineError> {
        Ok(self.store.clear_cart(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::NewProduct;
    use store::MemoryStorage;

    async fn seed(store: &MemoryStorage, stock: i32) -> ProductId {
        store
            .create_product(NewProduct {
                category_id: None,
                name: "Candle".to_string(),
                slug: "candle".to_string(),
                description: None,
                price: Money::from_units(10_000),
                stock,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_add_item_caps_at_available_stock() {
        let store = MemoryStorage::new();
        let product = seed(&store, 3).await;
        let cart = CartService::new(store);
        let user = UserId::new();

        cart.add_item(user, product, 2).await.unwrap();

        // 2 already in the cart; 2 more would exceed stock 3.
        let err = cart.add_item(user, product, 2).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Order(OrderError::InsufficientStock { .. })
        ));

        cart.add_item(user, product, 1).await.unwrap();
        let view = cart.view(user).await.unwrap();
        assert_eq!(view.items[0].quantity, 3);
        assert_eq!(view.total, Money::from_units(30_000));
    }

    #[tokio::test]
    async fn test_set_quantity_zero_removes_item() {
        let store = MemoryStorage::new();
        let product = seed(&store, 5).await;
        let cart = CartService::new(store);
        let user = UserId::new();

        cart.add_item(user, product, 2).await.unwrap();
        assert!(cart.set_quantity(user, product, 0).await.unwrap().is_none());
        assert!(cart.view(user).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_nonpositive_add() {
        let store = MemoryStorage::new();
        let product = seed(&store, 5).await;
        let cart = CartService::new(store);

        let err = cart.add_item(UserId::new(), product, 0).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Order(OrderError::InvalidQuantity { quantity: 0 })
        ));
    }
}
