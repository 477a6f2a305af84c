//! Shared types for the storefront workspace.
//!
//! Identifier newtypes keep the various UUID-keyed entities from being
//! mixed up at compile time; [`Money`] is a fixed-point amount in minor
//! currency units so monetary arithmetic never touches floating point.

mod money;
mod types;

pub use money::Money;
pub use types::{CartId, OrderId, PaymentId, ProductId, ShipmentId, UserId};
