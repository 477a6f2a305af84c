//! Notification delivery: the mailer trait and the outbox worker.
//!
//! Lifecycle transitions enqueue outbox rows inside their own atomic
//! unit; this module drains those rows afterwards. Transport failures
//! are retried up to a bounded attempt budget and never reach the caller
//! that triggered the transition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{OutboxMessage, OutboxStatus};
use store::Storage;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::EngineError;

/// Mail transport failure.
#[derive(Debug, Error)]
#[error("mail transport error: {0}")]
pub struct MailerError(pub String);

/// Trait for the transactional mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Delivers one notification.
    async fn send(&self, message: &OutboxMessage) -> Result<(), MailerError>;
}

#[derive(Debug, Default)]
struct MemoryMailerState {
    sent: Vec<OutboxMessage>,
    fail_on_send: bool,
}

/// In-memory mailer for testing.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    state: Arc<RwLock<MemoryMailerState>>,
}

impl MemoryMailer {
    /// Creates a new in-memory mailer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the mailer to fail on subsequent send calls.
    pub async fn set_fail_on_send(&self, fail: bool) {
        self.state.write().await.fail_on_send = fail;
    }

    /// Returns the number of delivered messages.
    pub async fn sent_count(&self) -> usize {
        self.state.read().await.sent.len()
    }

    /// Returns the delivered messages.
    pub async fn sent(&self) -> Vec<OutboxMessage> {
        self.state.read().await.sent.clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: &OutboxMessage) -> Result<(), MailerError> {
        let mut state = self.state.write().await;
        if state.fail_on_send {
            return Err(MailerError("smtp unavailable".to_string()));
        }
        state.sent.push(message.clone());
        Ok(())
    }
}

/// Mailer that only logs; stands in when no transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send(&self, message: &OutboxMessage) -> Result<(), MailerError> {
        tracing::info!(
            kind = %message.kind,
            order_id = %message.order_id,
            recipient = %message.recipient,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Polls the outbox and delivers pending notifications.
pub struct OutboxWorker<S, M> {
    store: S,
    mailer: M,
    batch_size: i64,
    max_attempts: i32,
}

impl<S: Storage, M: Mailer> OutboxWorker<S, M> {
    pub fn new(store: S, mailer: M) -> Self {
        Self {
            store,
            mailer,
            batch_size: 50,
            max_attempts: 5,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delivers one batch of pending notifications. Returns how many were
    /// sent successfully.
    #[tracing::instrument(skip(self))]
    pub async fn drain_once(&self) -> Result<usize, EngineError> {
        let due = self.store.due_notifications(self.batch_size).await?;
        let mut sent = 0;

        for message in due {
            match self.mailer.send(&message).await {
                Ok(()) => {
                    self.store.mark_notification_sent(message.id).await?;
                    metrics::counter!("notifications_sent_total", "kind" => message.kind.as_str())
                        .increment(1);
                    sent += 1;
                }
                Err(err) => {
                    let status = self
                        .store
                        .mark_notification_failed(message.id, self.max_attempts)
                        .await?;
                    metrics::counter!("notification_failures_total").increment(1);
                    match status {
                        OutboxStatus::Failed => tracing::error!(
                            outbox_id = %message.id,
                            kind = %message.kind,
                            error = %err,
                            "notification parked after exhausting retries"
                        ),
                        _ => tracing::warn!(
                            outbox_id = %message.id,
                            kind = %message.kind,
                            error = %err,
                            "notification delivery failed, will retry"
                        ),
                    }
                }
            }
        }
        Ok(sent)
    }

    /// Runs the worker until the process shuts down, polling on the given
    /// interval. Poll errors are logged and the loop keeps going.
    pub async fn run(self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.drain_once().await {
                tracing::error!(error = %err, "outbox drain failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, UserId};
    use domain::NotificationKind;

    fn message() -> OutboxMessage {
        OutboxMessage {
            id: uuid::Uuid::new_v4(),
            kind: NotificationKind::OrderConfirmed,
            order_id: OrderId::new(),
            recipient: UserId::new(),
            payload: serde_json::json!({"reference_number": "ORD-1-AAAAAAAA"}),
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: chrono::Utc::now(),
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_memory_mailer_records_sends() {
        let mailer = MemoryMailer::new();
        mailer.send(&message()).await.unwrap();
        assert_eq!(mailer.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_memory_mailer_fail_on_send() {
        let mailer = MemoryMailer::new();
        mailer.set_fail_on_send(true).await;
        assert!(mailer.send(&message()).await.is_err());
        assert_eq!(mailer.sent_count().await, 0);
    }
}
