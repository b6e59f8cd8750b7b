//! Oldest-first claiming and batch limit tests.

use super::harness::{registry_with, seed_at, store, test_config, RecordingHandler};
use crate::{OutboxProcessor, RelayConfig};
use chrono::Utc;

/// Messages are delivered in occurrence order, not insertion order.
#[tokio::test]
async fn delivery_follows_occurrence_order() {
    let store = store().await;
    let base = Utc::now();

    // Insert out of order on purpose
    let third = seed_at(&store, "E", "{}", base - chrono::Duration::minutes(1)).await;
    let first = seed_at(&store, "E", "{}", base - chrono::Duration::minutes(5)).await;
    let second = seed_at(&store, "E", "{}", base - chrono::Duration::minutes(3)).await;

    let handler = RecordingHandler::new();
    let processor = OutboxProcessor::new(
        store,
        registry_with("E", handler.clone()),
        test_config(),
    )
    .unwrap();

    processor.run_cycle().await.unwrap();
    assert_eq!(handler.seen(), vec![first, second, third]);
}

/// The batch size caps how much one cycle claims; the backlog drains
/// oldest first across cycles.
#[tokio::test]
async fn batch_size_limits_each_cycle() {
    let store = store().await;
    let base = Utc::now();

    let mut expected = Vec::new();
    for i in 0..5 {
        let id = seed_at(
            &store,
            "E",
            "{}",
            base - chrono::Duration::minutes(10 - i),
        )
        .await;
        expected.push(id);
    }

    let handler = RecordingHandler::new();
    let config = RelayConfig {
        batch_size: 2,
        ..test_config()
    };
    let processor =
        OutboxProcessor::new(store.clone(), registry_with("E", handler.clone()), config).unwrap();

    let stats = processor.run_cycle().await.unwrap();
    assert_eq!(stats.claimed, 2);
    assert_eq!(handler.seen(), expected[..2]);

    let stats = processor.run_cycle().await.unwrap();
    assert_eq!(stats.claimed, 2);
    assert_eq!(handler.seen(), expected[..4]);

    let stats = processor.run_cycle().await.unwrap();
    assert_eq!(stats.claimed, 1);
    assert_eq!(handler.seen(), expected);

    assert_eq!(store.count_by_status().await.unwrap().completed, 5);
}

/// A message appended later with an older occurrence time is still
/// delivered before newer pending ones.
#[tokio::test]
async fn older_late_arrival_goes_first() {
    let store = store().await;
    let base = Utc::now();

    let newer = seed_at(&store, "E", "{}", base).await;
    let handler = RecordingHandler::new();
    let config = RelayConfig {
        batch_size: 1,
        ..test_config()
    };
    let processor =
        OutboxProcessor::new(store.clone(), registry_with("E", handler.clone()), config).unwrap();

    // Arrives after `newer` but occurred before it
    let older = seed_at(&store, "E", "{}", base - chrono::Duration::minutes(2)).await;

    processor.run_cycle().await.unwrap();
    processor.run_cycle().await.unwrap();
    assert_eq!(handler.seen(), vec![older, newer]);
}
