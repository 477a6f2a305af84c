//! Shipment records and tracking numbers.

use chrono::{DateTime, Utc};
use common::{OrderId, ShipmentId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fulfillment status of a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    /// Tracking number issued, parcel with the carrier.
    #[default]
    InTransit,
    /// Carrier confirmed delivery.
    Delivered,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::InTransit => "IN_TRANSIT",
            ShipmentStatus::Delivered => "DELIVERED",
        }
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_TRANSIT" => Ok(ShipmentStatus::InTransit),
            "DELIVERED" => Ok(ShipmentStatus::Delivered),
            other => Err(format!("unknown shipment status: {other}")),
        }
    }
}

/// The 1:1 record tracking physical fulfillment of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub order_id: OrderId,
    pub carrier: Option<String>,
    /// Carrier guide number; the public tracking lookup matches on this
    /// or on the order's own tracking number.
    pub guide_number: String,
    pub status: ShipmentStatus,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub tracking_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Generates a tracking number unique within the system.
///
/// Same shape as order references: millisecond timestamp plus an
/// 8-hex-digit random suffix. Format: `TRK-1731103442713-4E07408C`.
pub fn new_tracking_number() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase();
    format!("TRK-{millis}-{suffix}")
}
