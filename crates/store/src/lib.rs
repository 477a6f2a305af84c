//! Persistence layer for the storefront.
//!
//! The [`Storage`] trait is the transactional boundary of the system: each
//! method is one atomic unit, so callers never observe partial effects of
//! a checkout, settlement, or fulfillment step. Status changes re-check
//! the stored value (compare-and-swap) and stock moves use conditional
//! updates, which is what serializes concurrent transitions touching the
//! same order or product.
//!
//! Two implementations:
//! - [`MemoryStorage`] — a single lock over plain maps, for tests and demos
//! - [`PostgresStorage`] — sqlx transactions with conditional `UPDATE`s

pub mod error;
pub mod memory;
pub mod postgres;
pub mod storage;

pub use error::StoreError;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use storage::{
    OrderFilter, OrderWithDetails, PaymentStats, Settlement, ShipmentDraft, Storage, TrackingItem,
    TrackingView,
};

/// Convenience result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
