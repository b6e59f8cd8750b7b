//! Background processor driving the relay cycle.

use crate::claim::ClaimManager;
use crate::dispatch::{Dispatcher, Disposition};
use crate::recovery::RecoverySweep;
use crate::{HandlerRegistry, RelayConfig, RelayError, RelayResult};
use chrono::Utc;
use outbox_store::AsyncOutboxStore;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Counts from one relay cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Messages claimed this cycle.
    pub claimed: usize,
    /// Messages delivered and recorded as completed.
    pub completed: usize,
    /// Messages returned to the pool after a failed attempt.
    pub requeued: usize,
    /// Messages recorded as permanently failed.
    pub failed: usize,
    /// Claims lost to another worker before the outcome landed.
    pub overtaken: usize,
    /// Claims left unvisited because the processor was stopping.
    pub drained: usize,
    /// Stale claims released back to pending by the sweep.
    pub swept_released: u64,
    /// Stale claims failed permanently by the sweep.
    pub swept_failed: u64,
}

/// The relay's polling scheduler.
///
/// Runs one cycle at a time: sweep stale claims, claim a batch, dispatch
/// each message in order. The background worker repeats this on a fixed
/// interval; [`run_cycle`](Self::run_cycle) drives a single cycle by hand.
///
/// On [`stop`](Self::stop), the message currently being dispatched finishes
/// and its outcome is recorded; the rest of the batch is left `processing`
/// for the recovery sweep, and their interrupted attempts stay counted.
pub struct OutboxProcessor {
    config: RelayConfig,
    claim: ClaimManager,
    dispatcher: Dispatcher,
    sweep: RecoverySweep,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OutboxProcessor {
    /// Create a processor over the given store and handler registry.
    pub fn new(
        store: AsyncOutboxStore,
        registry: HandlerRegistry,
        config: RelayConfig,
    ) -> RelayResult<Self> {
        config.validate()?;

        let (shutdown, _) = watch::channel(false);
        let claim = ClaimManager::new(store.clone(), config.batch_size);
        let dispatcher = Dispatcher::new(store.clone(), registry, &config);
        let sweep = RecoverySweep::new(store, &config);

        Ok(Self {
            config,
            claim,
            dispatcher,
            sweep,
            shutdown,
            worker: Mutex::new(None),
        })
    }

    /// Start the background polling worker.
    ///
    /// The first cycle runs immediately; later cycles follow the poll
    /// interval. Returns [`RelayError::AlreadyRunning`] if the worker is
    /// already active.
    pub fn start(&self) -> RelayResult<()> {
        let mut guard = self.worker.lock().expect("lock poisoned");
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return Err(RelayError::AlreadyRunning);
            }
        }

        self.shutdown.send_replace(false);
        let mut shutdown_rx = self.shutdown.subscribe();
        let drain_rx = self.shutdown.subscribe();

        let claim = self.claim.clone();
        let dispatcher = self.dispatcher.clone();
        let sweep = self.sweep.clone();
        let poll_interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(poll_interval = ?poll_interval, "Outbox processor started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // A dropped sender counts as a stop signal
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match run_one_cycle(&claim, &dispatcher, &sweep, || *drain_rx.borrow()).await {
                            Ok(stats) => {
                                if stats != CycleStats::default() {
                                    info!(
                                        claimed = stats.claimed,
                                        completed = stats.completed,
                                        requeued = stats.requeued,
                                        failed = stats.failed,
                                        overtaken = stats.overtaken,
                                        drained = stats.drained,
                                        swept_released = stats.swept_released,
                                        swept_failed = stats.swept_failed,
                                        "Relay cycle finished"
                                    );
                                }
                                if *drain_rx.borrow() {
                                    break;
                                }
                            }
                            Err(e) => {
                                // The store being unavailable aborts the
                                // cycle, never the relay
                                warn!(error = %e, "Relay cycle failed");
                            }
                        }
                    }
                }
            }

            info!("Outbox processor loop exited");
        });

        *guard = Some(handle);
        Ok(())
    }

    /// Stop the worker, waiting for the in-flight cycle to wind down.
    pub async fn stop(&self) {
        let handle = self.worker.lock().expect("lock poisoned").take();
        let Some(handle) = handle else {
            debug!("Stop requested but no worker is running");
            return;
        };

        info!("Stopping outbox processor");
        self.shutdown.send_replace(true);
        if let Err(e) = handle.await {
            warn!(error = %e, "Processor worker ended abnormally");
        }
    }

    /// Whether the background worker is active.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Run a single cycle to completion.
    ///
    /// Manual cycles never drain mid-batch, regardless of any earlier
    /// [`stop`](Self::stop).
    pub async fn run_cycle(&self) -> RelayResult<CycleStats> {
        run_one_cycle(&self.claim, &self.dispatcher, &self.sweep, || false).await
    }

    /// The configuration this processor runs with.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

/// One sweep-claim-dispatch pass.
///
/// The sweep runs first so rows freed from dead claims can be picked up in
/// the same cycle. `should_drain` is consulted between messages; once it
/// reports true the rest of the batch is abandoned to the sweep.
async fn run_one_cycle(
    claim: &ClaimManager,
    dispatcher: &Dispatcher,
    sweep: &RecoverySweep,
    should_drain: impl Fn() -> bool,
) -> RelayResult<CycleStats> {
    let mut stats = CycleStats::default();
    let now = Utc::now();

    let outcome = sweep.sweep(now).await?;
    stats.swept_released = outcome.released;
    stats.swept_failed = outcome.failed;

    let batch = claim.claim(now).await?;
    stats.claimed = batch.len();

    for (index, message) in batch.iter().enumerate() {
        if should_drain() {
            stats.drained = batch.len() - index;
            debug!(drained = stats.drained, "Drained remaining claims on shutdown");
            break;
        }

        match dispatcher.dispatch(message).await? {
            Disposition::Completed => stats.completed += 1,
            Disposition::Requeued => stats.requeued += 1,
            Disposition::Failed => stats.failed += 1,
            Disposition::Overtaken => stats.overtaken += 1,
        }
    }

    Ok(stats)
}
