//! Batch claiming for the relay cycle.

use crate::RelayResult;
use chrono::{DateTime, Utc};
use outbox_store::{AsyncOutboxStore, OutboxMessage};
use tracing::debug;

/// Claims batches of pending messages for delivery.
///
/// Claiming flips each row from `pending` to `processing` via a
/// conditional update, so a row lands in at most one claimer's batch no
/// matter how many relay processes poll the same database.
#[derive(Clone)]
pub struct ClaimManager {
    store: AsyncOutboxStore,
    batch_size: usize,
}

impl ClaimManager {
    /// Create a claim manager with the given batch size.
    pub fn new(store: AsyncOutboxStore, batch_size: usize) -> Self {
        Self { store, batch_size }
    }

    /// Claim up to `batch_size` pending messages, oldest first.
    ///
    /// Rows lost to a concurrent claimer are silently absent from the
    /// returned batch. Each claimed row has its attempt counted and its
    /// claim stamped at `now`.
    pub async fn claim(&self, now: DateTime<Utc>) -> RelayResult<Vec<OutboxMessage>> {
        let batch = self.store.claim_batch(self.batch_size, now).await?;
        if !batch.is_empty() {
            debug!(count = batch.len(), "Claimed message batch");
        }
        Ok(batch)
    }
}
