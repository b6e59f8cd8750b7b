//! Cross-cutting state machine invariants.

use super::harness::{
    registry_with, seed, store, test_config, FailNTimesHandler, FailingHandler, MalformedHandler,
    RecordingHandler,
};
use crate::OutboxProcessor;
use outbox_store::OutboxStatus;
use std::sync::Arc;

/// `processed_on_utc` is set exactly on completed rows and
/// `processing_started_at` exactly on processing rows, across every
/// terminal and non-terminal outcome.
#[tokio::test]
async fn timestamp_fields_match_status() {
    let store = store().await;
    let mut registry = registry_with("Ok", RecordingHandler::new());
    registry.register("Flaky", Arc::new(FailingHandler));
    registry.register("Bad", Arc::new(MalformedHandler));
    let processor = OutboxProcessor::new(store.clone(), registry, test_config()).unwrap();

    let ids = vec![
        seed(&store, "Ok", "{}").await,
        seed(&store, "Flaky", "{}").await,
        seed(&store, "Bad", "{}").await,
        seed(&store, "Unregistered", "{}").await,
    ];
    processor.run_cycle().await.unwrap();

    // Claim the released Flaky row and a fresh one, leaving both mid-flight
    let parked = seed(&store, "Parked", "{}").await;
    let claimed = store.claim_batch(2, chrono::Utc::now()).await.unwrap();
    assert_eq!(claimed.len(), 2);

    for id in ids.iter().chain(std::iter::once(&parked)) {
        let row = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(
            row.status == OutboxStatus::Completed,
            row.processed_on_utc.is_some(),
            "processed_on_utc out of step for {id} ({:?})",
            row.status
        );
        assert_eq!(
            row.status == OutboxStatus::Processing,
            row.processing_started_at.is_some(),
            "processing_started_at out of step for {id} ({:?})",
            row.status
        );
    }
}

/// Attempts never exceed the configured budget, no matter how many cycles
/// run.
#[tokio::test]
async fn attempts_never_exceed_budget() {
    let store = store().await;
    let processor = OutboxProcessor::new(
        store.clone(),
        registry_with("E", Arc::new(FailingHandler)),
        test_config(), // max_attempts: 3
    )
    .unwrap();
    let id = seed(&store, "E", "{}").await;

    for _ in 0..6 {
        processor.run_cycle().await.unwrap();
        let row = store.get_message(&id).await.unwrap().unwrap();
        assert!(row.attempts <= 3, "attempts climbed to {}", row.attempts);
    }

    let row = store.get_message(&id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.attempts, 3);
}

/// Terminal rows cannot be mutated by stale workers or later cycles.
#[tokio::test]
async fn terminal_rows_are_immutable() {
    let store = store().await;
    let processor = OutboxProcessor::new(
        store.clone(),
        registry_with("E", RecordingHandler::new()),
        test_config(),
    )
    .unwrap();
    let id = seed(&store, "E", "{}").await;

    processor.run_cycle().await.unwrap();
    let completed = store.get_message(&id).await.unwrap().unwrap();
    assert_eq!(completed.status, OutboxStatus::Completed);

    // No finalizer touches a completed row, even with the right version
    assert!(!store
        .release_for_retry(&id, completed.version, "late error".to_string())
        .await
        .unwrap());
    assert!(!store
        .mark_failed(&id, completed.version, "late error".to_string())
        .await
        .unwrap());
    assert!(!store
        .mark_completed(&id, completed.version, chrono::Utc::now())
        .await
        .unwrap());

    let row = store.get_message(&id).await.unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Completed);
    assert_eq!(row.version, completed.version);
    assert_eq!(row.processed_on_utc, completed.processed_on_utc);
    assert!(row.last_error.is_none());
}

/// The version column climbs with every transition, so any stale observer
/// is fenced out.
#[tokio::test]
async fn version_increases_across_transitions() {
    let store = store().await;
    let processor = OutboxProcessor::new(
        store.clone(),
        registry_with("E", FailNTimesHandler::new(1)),
        test_config(),
    )
    .unwrap();
    let id = seed(&store, "E", "{}").await;

    let fresh = store.get_message(&id).await.unwrap().unwrap();
    assert_eq!(fresh.version, 0);

    // claim + release
    processor.run_cycle().await.unwrap();
    let released = store.get_message(&id).await.unwrap().unwrap();
    assert_eq!(released.status, OutboxStatus::Pending);
    assert_eq!(released.version, 2);

    // claim + complete
    processor.run_cycle().await.unwrap();
    let completed = store.get_message(&id).await.unwrap().unwrap();
    assert_eq!(completed.status, OutboxStatus::Completed);
    assert_eq!(completed.version, 4);
}

/// A row with an unrecognized status is invisible to the claim pool and
/// never crashes a cycle.
#[tokio::test]
async fn corrupt_status_rows_are_quarantined() {
    let store = store().await;
    let processor = OutboxProcessor::new(
        store.clone(),
        registry_with("E", RecordingHandler::new()),
        test_config(),
    )
    .unwrap();

    let corrupt = seed(&store, "E", "{}").await;
    let healthy = seed(&store, "E", "{}").await;

    {
        let corrupt = corrupt.clone();
        store
            .call(move |conn| {
                conn.execute(
                    "UPDATE outbox_messages SET status = 'shipped' WHERE id = ?1",
                    [corrupt.as_str()],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    // The healthy row is delivered; the corrupt one is simply not claimed
    let stats = processor.run_cycle().await.unwrap();
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.completed, 1);

    assert_eq!(
        store.get_message(&healthy).await.unwrap().unwrap().status,
        OutboxStatus::Completed
    );

    // Reading the corrupt row reports the corruption instead of guessing
    assert!(store.get_message(&corrupt).await.is_err());
}
