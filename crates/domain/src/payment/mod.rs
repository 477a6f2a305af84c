//! Payment records and gateway rules.

mod gateway;
mod signature;

pub use gateway::{Disposition, GatewayNotification, GatewayState, WebhookPolicy};
pub use signature::SignatureParams;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

/// Settlement status of an order's payment.
///
/// `Approved` and `Declined` are terminal: a payment row is updated at
/// most once by the gateway, and conflicting redeliveries are recorded as
/// [`PaymentAnomaly`] rows instead of overwriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Approved,
    Declined,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Approved | PaymentStatus::Declined)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Declined => "DECLINED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "APPROVED" => Ok(PaymentStatus::Approved),
            "DECLINED" => Ok(PaymentStatus::Declined),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// The 1:1 record tracking settlement of an order against the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    /// Always equals the order total.
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    /// Gateway-side transaction identifier, set on settlement.
    pub transaction_id: Option<String>,
    /// Raw gateway payload, archived for audit and dispute resolution.
    pub gateway_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A webhook delivery that conflicted with an already-terminal payment,
/// or carried a state the system never applies automatically.
///
/// Recorded for operator review; never auto-resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAnomaly {
    pub id: uuid::Uuid,
    pub order_id: OrderId,
    pub reference_number: String,
    pub stored_status: PaymentStatus,
    pub stored_transaction_id: Option<String>,
    pub incoming_state: String,
    pub incoming_transaction_id: Option<String>,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}
