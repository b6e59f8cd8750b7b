//! Recovery sweep for abandoned claims.

use crate::{RelayConfig, RelayResult};
use chrono::{DateTime, Utc};
use outbox_store::{AsyncOutboxStore, SweepOutcome};
use std::time::Duration;
use tracing::info;

/// Returns stale `processing` claims to the pool.
///
/// A claim whose `processing_started_at` is older than the stale threshold
/// belongs to a worker presumed dead. The row's attempt was already counted
/// at claim time, so sweeping releases it when budget remains and fails it
/// permanently when the budget is spent.
#[derive(Clone)]
pub struct RecoverySweep {
    store: AsyncOutboxStore,
    stale_threshold: Duration,
    max_attempts: i32,
}

impl RecoverySweep {
    /// Create a sweep over the given store.
    pub fn new(store: AsyncOutboxStore, config: &RelayConfig) -> Self {
        Self {
            store,
            stale_threshold: config.stale_threshold,
            max_attempts: config.max_attempts,
        }
    }

    /// Sweep claims staler than the threshold, measured from `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> RelayResult<SweepOutcome> {
        // A threshold past chrono's range means no claim can be stale yet
        let staleness = chrono::Duration::from_std(self.stale_threshold)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now
            .checked_sub_signed(staleness)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let outcome = self.store.sweep_stale(cutoff, self.max_attempts).await?;
        if outcome.released > 0 || outcome.failed > 0 {
            info!(
                released = outcome.released,
                failed = outcome.failed,
                "Recovered stale processing claims"
            );
        }
        Ok(outcome)
    }
}
