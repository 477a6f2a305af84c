//! Payment gateway webhook adapter.
//!
//! Translates external gateway callbacks into order engine transitions.
//! Deliveries are at-least-once: the adapter verifies the payload
//! signature before touching any state, applies each notification at
//! most once, and records conflicting redeliveries as anomalies for an
//! operator instead of overwriting terminal state.

use chrono::Utc;
use domain::{
    Disposition, GatewayNotification, Payment, PaymentAnomaly, PaymentStatus, SignatureParams,
    WebhookPolicy,
};
use store::{Settlement, Storage, StoreError};
use thiserror::Error;
use uuid::Uuid;

/// Gateway credentials and webhook policy.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Merchant API key used to verify notification signatures.
    pub api_key: String,
    pub merchant_id: String,
    pub policy: WebhookPolicy,
}

/// Errors the gateway is expected to react to. Anything else is
/// acknowledged so the gateway stops redelivering.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Structurally invalid payload; rejected before verification.
    #[error("malformed webhook payload: {0}")]
    Malformed(&'static str),

    /// Signature did not verify. No state was touched.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// The referenced order does not exist.
    #[error("unknown order reference: {0}")]
    UnknownReference(String),

    /// The storage layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a successfully acknowledged notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// First delivery: the settlement was applied.
    Applied,
    /// The gateway state does not settle anything (e.g. still pending).
    Ignored,
    /// Redelivery matching the stored terminal state: no-op.
    Duplicate,
    /// Conflicting or non-applicable notification; recorded for review.
    AnomalyRecorded,
}

/// Applies gateway callbacks to the order engine.
pub struct PaymentWebhookAdapter<S> {
    store: S,
    config: GatewayConfig,
}

impl<S: Storage> PaymentWebhookAdapter<S> {
    pub fn new(store: S, config: GatewayConfig) -> Self {
        Self { store, config }
    }

    /// Handles one gateway notification.
    ///
    /// Processing order: structural validation, signature verification,
    /// order lookup, state mapping, idempotency check, settlement. Every
    /// `Ok` outcome must be acknowledged with success to the gateway
    /// regardless of business result, per the gateway contract.
    #[tracing::instrument(skip(self, notification), fields(reference = %notification.reference_code))]
    pub async fn handle_webhook(
        &self,
        notification: GatewayNotification,
    ) -> Result<WebhookOutcome, WebhookError> {
        metrics::counter!("payment_webhooks_received_total").increment(1);

        if notification.reference_code.trim().is_empty() {
            return Err(WebhookError::Malformed("reference_code is required"));
        }
        if notification.state_pol.trim().is_empty() {
            return Err(WebhookError::Malformed("state_pol is required"));
        }
        if notification.value.trim().is_empty() {
            return Err(WebhookError::Malformed("value is required"));
        }
        if notification.sign.trim().is_empty() {
            return Err(WebhookError::Malformed("sign is required"));
        }

        let params = SignatureParams {
            api_key: &self.config.api_key,
            merchant_id: &self.config.merchant_id,
            reference_code: &notification.reference_code,
            value: &notification.value,
            currency: &notification.currency,
            state_code: &notification.state_pol,
        };
        if !params.verify(&notification.sign) {
            metrics::counter!("payment_webhooks_rejected_total", "reason" => "signature")
                .increment(1);
            tracing::warn!("webhook signature verification failed");
            return Err(WebhookError::InvalidSignature);
        }

        let order = self
            .store
            .find_order_by_reference(&notification.reference_code)
            .await?
            .ok_or_else(|| WebhookError::UnknownReference(notification.reference_code.clone()))?;

        let payment = self
            .store
            .get_payment(order.id)
            .await?
            .ok_or_else(|| StoreError::not_found("payment", order.id))?;

        let state = notification.state();
        match self.config.policy.disposition(&state) {
            Disposition::Ignore => {
                tracing::info!(state = %state, "webhook acknowledged without effect");
                Ok(WebhookOutcome::Ignored)
            }
            Disposition::Anomaly => {
                self.record_anomaly(&payment, &notification).await?;
                Ok(WebhookOutcome::AnomalyRecorded)
            }
            Disposition::Approve => {
                self.settle(&payment, &notification, PaymentStatus::Approved)
                    .await
            }
            Disposition::Decline => {
                self.settle(&payment, &notification, PaymentStatus::Declined)
                    .await
            }
        }
    }

    /// Applies a terminal settlement idempotently.
    async fn settle(
        &self,
        payment: &Payment,
        notification: &GatewayNotification,
        target: PaymentStatus,
    ) -> Result<WebhookOutcome, WebhookError> {
        if payment.status.is_terminal() {
            return self.resolve_redelivery(payment, notification, target).await;
        }

        let payload =
            serde_json::to_value(notification).map_err(StoreError::Serialization)?;
        let settlement = match target {
            PaymentStatus::Approved => Settlement::Approve {
                transaction_id: notification.reference_pol.clone(),
                payload,
            },
            _ => Settlement::Decline {
                transaction_id: notification.reference_pol.clone(),
                payload,
            },
        };

        match self.store.settle_payment(payment.order_id, settlement).await {
            Ok(_) => {
                metrics::counter!("payments_settled_total", "status" => target.as_str())
                    .increment(1);
                tracing::info!(order_id = %payment.order_id, status = %target, "payment settled");
                Ok(WebhookOutcome::Applied)
            }
            // Lost the race against a concurrent delivery: re-read the
            // now-terminal payment and classify this one.
            Err(StoreError::AlreadySettled { .. }) => {
                let current = self
                    .store
                    .get_payment(payment.order_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found("payment", payment.order_id))?;
                self.resolve_redelivery(&current, notification, target).await
            }
            // The order moved underneath the settlement (e.g. an admin
            // cancelled while the approval was in flight). The payment is
            // untouched; surface the delivery to an operator.
            Err(StoreError::StaleStatus { .. }) => {
                self.record_anomaly(payment, notification).await?;
                Ok(WebhookOutcome::AnomalyRecorded)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Classifies a delivery against an already-terminal payment: an
    /// exact match is a harmless duplicate, anything else is an anomaly.
    async fn resolve_redelivery(
        &self,
        payment: &Payment,
        notification: &GatewayNotification,
        target: PaymentStatus,
    ) -> Result<WebhookOutcome, WebhookError> {
        let same_outcome = payment.status == target;
        let same_transaction = payment.transaction_id == notification.reference_pol;
        if same_outcome && same_transaction {
            tracing::info!(order_id = %payment.order_id, "duplicate webhook delivery ignored");
            Ok(WebhookOutcome::Duplicate)
        } else {
            self.record_anomaly(payment, notification).await?;
            Ok(WebhookOutcome::AnomalyRecorded)
        }
    }

    async fn record_anomaly(
        &self,
        payment: &Payment,
        notification: &GatewayNotification,
    ) -> Result<(), WebhookError> {
        let payload =
            serde_json::to_value(notification).map_err(StoreError::Serialization)?;
        self.store
            .record_payment_anomaly(PaymentAnomaly {
                id: Uuid::new_v4(),
                order_id: payment.order_id,
                reference_number: notification.reference_code.clone(),
                stored_status: payment.status,
                stored_transaction_id: payment.transaction_id.clone(),
                incoming_state: notification.state().to_string(),
                incoming_transaction_id: notification.reference_pol.clone(),
                payload,
                recorded_at: Utc::now(),
            })
            .await?;
        metrics::counter!("payment_anomalies_total").increment(1);
        tracing::warn!(
            order_id = %payment.order_id,
            stored = %payment.status,
            incoming = %notification.state(),
            "payment anomaly recorded for operator review"
        );
        Ok(())
    }
}
