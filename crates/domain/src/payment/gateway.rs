//! Gateway notification mapping.
//!
//! The gateway reports transaction state as a numeric code (`state_pol`).
//! Each code is mapped explicitly; codes the system does not settle
//! automatically are either acknowledged without effect or recorded for
//! an operator, never conflated with a decline.

use serde::{Deserialize, Serialize};

/// Transaction states reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayState {
    /// Code 4: transaction approved.
    Approved,
    /// Code 5: transaction declined.
    Declined,
    /// Code 6: transaction still pending on the gateway side.
    Pending,
    /// Code 7: transaction expired before the customer paid.
    Expired,
    /// Code 8: customer abandoned the payment flow.
    Abandoned,
    /// Code 14: transaction refunded.
    Refunded,
    /// Any other code.
    Unknown(String),
}

impl GatewayState {
    /// Maps a raw `state_pol` code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "4" => GatewayState::Approved,
            "5" => GatewayState::Declined,
            "6" => GatewayState::Pending,
            "7" => GatewayState::Expired,
            "8" => GatewayState::Abandoned,
            "14" => GatewayState::Refunded,
            other => GatewayState::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GatewayState::Approved => "approved",
            GatewayState::Declined => "declined",
            GatewayState::Pending => "pending",
            GatewayState::Expired => "expired",
            GatewayState::Abandoned => "abandoned",
            GatewayState::Refunded => "refunded",
            GatewayState::Unknown(code) => code,
        }
    }
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which non-approved states cancel the order.
///
/// Declines always cancel. Expiry and abandonment are business policy and
/// configurable; refunds and unrecognised codes are never applied
/// automatically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WebhookPolicy {
    pub cancel_on_expired: bool,
    pub cancel_on_abandoned: bool,
}

impl Default for WebhookPolicy {
    fn default() -> Self {
        Self {
            cancel_on_expired: true,
            cancel_on_abandoned: true,
        }
    }
}

/// What the webhook adapter should do with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Settle the payment as approved and confirm the order.
    Approve,
    /// Settle the payment as declined, cancel the order, release stock.
    Decline,
    /// Acknowledge without touching any state.
    Ignore,
    /// Record an anomaly for operator review, then acknowledge.
    Anomaly,
}

impl WebhookPolicy {
    /// Decides the disposition for a gateway state.
    pub fn disposition(&self, state: &GatewayState) -> Disposition {
        match state {
            GatewayState::Approved => Disposition::Approve,
            GatewayState::Declined => Disposition::Decline,
            GatewayState::Pending => Disposition::Ignore,
            GatewayState::Expired => {
                if self.cancel_on_expired {
                    Disposition::Decline
                } else {
                    Disposition::Ignore
                }
            }
            GatewayState::Abandoned => {
                if self.cancel_on_abandoned {
                    Disposition::Decline
                } else {
                    Disposition::Ignore
                }
            }
            GatewayState::Refunded | GatewayState::Unknown(_) => Disposition::Anomaly,
        }
    }
}

/// The fields of a gateway confirmation callback the adapter consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayNotification {
    /// The order reference number the merchant supplied at checkout.
    pub reference_code: String,
    /// Raw transaction state code.
    pub state_pol: String,
    /// Transaction amount as formatted by the gateway.
    pub value: String,
    pub currency: String,
    /// Gateway-side transaction identifier.
    pub reference_pol: Option<String>,
    /// Integrity signature over the payload.
    pub sign: String,
}

impl GatewayNotification {
    pub fn state(&self) -> GatewayState {
        GatewayState::from_code(&self.state_pol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_code_mapping() {
        assert_eq!(GatewayState::from_code("4"), GatewayState::Approved);
        assert_eq!(GatewayState::from_code("5"), GatewayState::Declined);
        assert_eq!(GatewayState::from_code("6"), GatewayState::Pending);
        assert_eq!(GatewayState::from_code("7"), GatewayState::Expired);
        assert_eq!(GatewayState::from_code("8"), GatewayState::Abandoned);
        assert_eq!(GatewayState::from_code("14"), GatewayState::Refunded);
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        assert_eq!(
            GatewayState::from_code("104"),
            GatewayState::Unknown("104".to_string())
        );
    }

    #[test]
    fn test_default_policy_dispositions() {
        let policy = WebhookPolicy::default();
        assert_eq!(policy.disposition(&GatewayState::Approved), Disposition::Approve);
        assert_eq!(policy.disposition(&GatewayState::Declined), Disposition::Decline);
        assert_eq!(policy.disposition(&GatewayState::Pending), Disposition::Ignore);
        assert_eq!(policy.disposition(&GatewayState::Expired), Disposition::Decline);
        assert_eq!(policy.disposition(&GatewayState::Abandoned), Disposition::Decline);
        assert_eq!(policy.disposition(&GatewayState::Refunded), Disposition::Anomaly);
        assert_eq!(
            policy.disposition(&GatewayState::Unknown("99".to_string())),
            Disposition::Anomaly
        );
    }

    #[test]
    fn test_lenient_policy_ignores_expiry() {
        let policy = WebhookPolicy {
            cancel_on_expired: false,
            cancel_on_abandoned: false,
        };
        assert_eq!(policy.disposition(&GatewayState::Expired), Disposition::Ignore);
        assert_eq!(policy.disposition(&GatewayState::Abandoned), Disposition::Ignore);
        // Hard declines are not policy-gated.
        assert_eq!(policy.disposition(&GatewayState::Declined), Disposition::Decline);
    }
}
