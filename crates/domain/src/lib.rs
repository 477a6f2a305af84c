//! Business rules for the storefront.
//!
//! This crate is pure: no I/O, no clocks beyond timestamp generation for
//! reference numbers. It provides:
//! - the order status state machine and checkout pricing
//! - payment status, gateway notification mapping, and webhook signature
//!   verification
//! - shipment and tracking number rules
//! - the record types shared between the engine and the storage layer

pub mod cart;
pub mod catalog;
pub mod notification;
pub mod order;
pub mod payment;
pub mod shipment;

pub use cart::{Cart, CartItem, CartLine};
pub use catalog::{CatalogError, NewProduct, Product, ProductPatch};
pub use notification::{NotificationKind, OutboxMessage, OutboxStatus};
pub use order::{
    NewOrder, NewOrderLine, Order, OrderError, OrderLine, OrderStatus, PaymentMethod, PricedCart,
    PricingConfig, new_reference_number,
};
pub use payment::{
    Disposition, GatewayNotification, GatewayState, Payment, PaymentAnomaly, PaymentStatus,
    SignatureParams, WebhookPolicy,
};
pub use shipment::{Shipment, ShipmentStatus, new_tracking_number};
