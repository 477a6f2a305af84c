//! Engine error types.

use domain::OrderError;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A business rule rejected the operation.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// A catalog validation rejected the operation.
    #[error(transparent)]
    Catalog(#[from] domain::CatalogError),

    /// The storage layer rejected or failed the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The resource does not exist or is not visible to the requester.
    /// Deliberately indistinguishable between the two, so existence of
    /// other users' orders is never leaked.
    #[error("{0} not found")]
    NotFound(&'static str),
}

impl EngineError {
    /// Returns true if the error is a conflict the caller may retry with
    /// updated assumptions (stale status, insufficient stock).
    pub fn is_conflict(&self) -> bool {
        match self {
            EngineError::Order(
                OrderError::InsufficientStock { .. } | OrderError::InvalidTransition { .. },
            ) => true,
            EngineError::Store(
                StoreError::InsufficientStock { .. }
                | StoreError::StaleStatus { .. }
                | StoreError::AlreadySettled { .. }
                | StoreError::Duplicate { .. },
            ) => true,
            _ => false,
        }
    }
}
