//! Storage error types.

use common::{OrderId, ProductId};
use domain::{OrderStatus, PaymentStatus};
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// An atomic stock decrement found fewer units than requested.
    /// The whole unit it belonged to was rolled back.
    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: ProductId },

    /// A status compare-and-swap found a different stored status than the
    /// caller expected. The caller should re-read and re-decide.
    #[error("order {order_id} status changed concurrently (stored: {actual})")]
    StaleStatus {
        order_id: OrderId,
        actual: OrderStatus,
    },

    /// A payment settlement found the payment already in a terminal state.
    #[error("payment for order {order_id} already settled as {status}")]
    AlreadySettled {
        order_id: OrderId,
        status: PaymentStatus,
    },

    /// A unique constraint was violated (slug, reference, tracking number).
    #[error("duplicate {field}: {value}")]
    Duplicate { field: &'static str, value: String },

    /// An error occurred at the database layer.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored JSON payload failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored enum value is outside the known vocabulary.
    #[error("corrupt stored value in column {column}: {value}")]
    CorruptValue { column: &'static str, value: String },
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}
