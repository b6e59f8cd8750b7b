//! Per-message dispatch and outcome recording.

use crate::{HandlerError, HandlerRegistry, RelayConfig, RelayResult};
use chrono::Utc;
use outbox_store::{AsyncOutboxStore, OutboxMessage};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// What became of one claimed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delivered and recorded as completed
    Completed,
    /// Attempt failed; returned to the pool with budget remaining
    Requeued,
    /// Recorded as permanently failed
    Failed,
    /// The row changed hands while we held it; outcome discarded
    Overtaken,
}

/// Invokes handlers for claimed messages and records the outcome.
///
/// Every outcome is written through a version-guarded update, so a worker
/// that lost its claim to the recovery sweep cannot clobber the row's new
/// owner. Store errors propagate to the caller and abort the cycle; the
/// affected claims are recovered by a later sweep.
#[derive(Clone)]
pub struct Dispatcher {
    store: AsyncOutboxStore,
    registry: HandlerRegistry,
    max_attempts: i32,
    handler_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over the given registry.
    pub fn new(store: AsyncOutboxStore, registry: HandlerRegistry, config: &RelayConfig) -> Self {
        Self {
            store,
            registry,
            max_attempts: config.max_attempts,
            handler_timeout: config.handler_timeout,
        }
    }

    /// Deliver one claimed message and record what happened.
    ///
    /// The message must carry the version observed at claim time; all
    /// finalizers compare against it.
    pub async fn dispatch(&self, message: &OutboxMessage) -> RelayResult<Disposition> {
        let Some(handler) = self.registry.get(&message.message_type) else {
            // No amount of retrying produces a handler
            let reason = format!(
                "no handler registered for message type '{}'",
                message.message_type
            );
            return self.finalize_failed(message, &reason).await;
        };

        let outcome = match timeout(self.handler_timeout, handler.handle(message)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Delivery(format!(
                "handler timed out after {:?}",
                self.handler_timeout
            ))),
        };

        match outcome {
            Ok(()) => {
                let updated = self
                    .store
                    .mark_completed(&message.id, message.version, Utc::now())
                    .await?;
                if updated {
                    debug!(
                        message_id = %message.id,
                        message_type = %message.message_type,
                        attempts = message.attempts,
                        "Message delivered"
                    );
                    Ok(Disposition::Completed)
                } else {
                    self.note_overtaken(message);
                    Ok(Disposition::Overtaken)
                }
            }
            Err(HandlerError::Malformed(reason)) => self.finalize_failed(message, &reason).await,
            Err(HandlerError::Delivery(reason)) => {
                if message.attempts >= self.max_attempts {
                    let full_reason =
                        format!("retry budget exhausted after {} attempts: {}", message.attempts, reason);
                    self.finalize_failed(message, &full_reason).await
                } else {
                    let updated = self
                        .store
                        .release_for_retry(&message.id, message.version, reason.clone())
                        .await?;
                    if updated {
                        debug!(
                            message_id = %message.id,
                            attempts = message.attempts,
                            error = %reason,
                            "Delivery failed, requeued"
                        );
                        Ok(Disposition::Requeued)
                    } else {
                        self.note_overtaken(message);
                        Ok(Disposition::Overtaken)
                    }
                }
            }
        }
    }

    async fn finalize_failed(
        &self,
        message: &OutboxMessage,
        reason: &str,
    ) -> RelayResult<Disposition> {
        let updated = self
            .store
            .mark_failed(&message.id, message.version, reason.to_string())
            .await?;
        if updated {
            warn!(
                message_id = %message.id,
                message_type = %message.message_type,
                attempts = message.attempts,
                error = %reason,
                "Message failed permanently"
            );
            Ok(Disposition::Failed)
        } else {
            self.note_overtaken(message);
            Ok(Disposition::Overtaken)
        }
    }

    fn note_overtaken(&self, message: &OutboxMessage) {
        warn!(
            message_id = %message.id,
            version = message.version,
            "Claim was overtaken; discarding outcome"
        );
    }
}
