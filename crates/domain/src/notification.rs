//! Notification outbox records.
//!
//! State transitions never send mail inline. The transition's atomic unit
//! enqueues an outbox row; a background worker delivers it afterwards and
//! retries on transport failure. A mail failure can therefore never roll
//! back or fail the transition that caused it.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The transactional email kinds dispatched on order lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmed,
    PaymentApproved,
    OrderCancelled,
    OrderShipped,
    OrderDelivered,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderConfirmed => "order_confirmed",
            NotificationKind::PaymentApproved => "payment_approved",
            NotificationKind::OrderCancelled => "order_cancelled",
            NotificationKind::OrderShipped => "order_shipped",
            NotificationKind::OrderDelivered => "order_delivered",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_confirmed" => Ok(NotificationKind::OrderConfirmed),
            "payment_approved" => Ok(NotificationKind::PaymentApproved),
            "order_cancelled" => Ok(NotificationKind::OrderCancelled),
            "order_shipped" => Ok(NotificationKind::OrderShipped),
            "order_delivered" => Ok(NotificationKind::OrderDelivered),
            other => Err(format!("unknown notification kind: {other}")),
        }
    }
}

/// Delivery status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for the worker.
    #[default]
    Pending,
    /// Delivered to the mail transport.
    Sent,
    /// Exhausted its retry budget; needs operator attention.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "sent" => Ok(OutboxStatus::Sent),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub order_id: OrderId,
    pub recipient: UserId,
    /// Snapshot of whatever the template needs (reference, totals,
    /// tracking number), taken when the row was enqueued.
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
