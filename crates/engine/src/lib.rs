//! Order engine core.
//!
//! Orchestrates the order/payment/shipment lifecycle over a [`Storage`]
//! backend:
//! - [`OrderEngine`] — checkout, visibility-scoped reads, admin status
//!   transitions (with stock compensation on cancellation)
//! - [`PaymentWebhookAdapter`] — verifies, maps, and idempotently applies
//!   gateway callbacks
//! - [`FulfillmentTracker`] — tracking numbers, delivery confirmation,
//!   the public tracking view
//! - [`OutboxWorker`] — delivers queued notifications out-of-band
//!
//! The engine is the authority on whether a transition is legal; the HTTP
//! layer only translates error kinds to status codes.
//!
//! [`Storage`]: store::Storage

pub mod cart;
pub mod error;
pub mod fulfillment;
pub mod notifications;
pub mod orders;
pub mod payments;

pub use cart::{CartService, CartView};
pub use error::EngineError;
pub use fulfillment::{FulfillmentTracker, IssuedTracking};
pub use notifications::{Mailer, MailerError, MemoryMailer, OutboxWorker, TracingMailer};
pub use orders::{CheckoutInput, OrderEngine, Requester};
pub use payments::{GatewayConfig, PaymentWebhookAdapter, WebhookError, WebhookOutcome};
