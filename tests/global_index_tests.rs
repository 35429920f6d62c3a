// Copyright 2025 Cowboy AI, LLC.

//! Integration tests for global index assignment
//!
//! The change feed delivers at least once and in any order; whatever it
//! does, every changeset must end up with exactly one position, and
//! positions must follow changeset order within each stream.

use cim_event_store::infrastructure::{
    GlobalCounterStore, GlobalIndexer, InMemoryKeyRangeStore, StreamStore,
};
use cim_event_store::{Changeset, ChangesetKey, GlobalPosition, IndexerConfig};
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn indexer(store: &InMemoryKeyRangeStore) -> GlobalIndexer {
    let backend = Arc::new(store.clone());
    GlobalIndexer::new(
        StreamStore::new(backend.clone()),
        GlobalCounterStore::new(backend),
        IndexerConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
            max_attempts: 100,
            backfill_batch: 3,
        },
    )
}

/// Append `count` single-event changesets to each stream; returns every key
async fn populate(store: &InMemoryKeyRangeStore, streams: &[(&str, usize)]) -> Vec<ChangesetKey> {
    let stream_store = StreamStore::new(Arc::new(store.clone()));
    let mut keys = Vec::new();
    for (stream_id, count) in streams {
        let mut tail = Changeset::initial(*stream_id, vec![json!(0)], json!({}));
        stream_store.append(tail.clone()).await.unwrap();
        keys.push(tail.key());
        for n in 1..*count {
            tail = Changeset::next(&tail, vec![json!(n)], json!({}));
            stream_store.append(tail.clone()).await.unwrap();
            keys.push(tail.key());
        }
    }
    keys
}

/// Every changeset positioned, positions unique, ascending within each stream
async fn assert_consistent(store: &InMemoryKeyRangeStore, expected: usize) {
    let changesets = store.all_changesets().await;
    assert_eq!(changesets.len(), expected);

    let mut seen = HashSet::new();
    let mut last_by_stream: HashMap<String, GlobalPosition> = HashMap::new();
    for changeset in &changesets {
        let position = changeset
            .global_position
            .unwrap_or_else(|| panic!("{} has no position", changeset.key()));
        assert!(seen.insert(position), "position {position} assigned twice");
        if let Some(previous) = last_by_stream.insert(changeset.stream_id.clone(), position) {
            assert!(previous < position, "{} out of order", changeset.key());
        }
    }

    // Dense: positions are exactly 0..n
    let mut checkpoints: Vec<u64> = seen.iter().map(|p| p.to_checkpoint()).collect();
    checkpoints.sort_unstable();
    assert_eq!(checkpoints, (0..expected as u64).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_shuffled_redelivered_notifications() {
    let store = InMemoryKeyRangeStore::new();
    let keys = populate(&store, &[("a", 7), ("b", 3), ("c", 5)]).await;

    let mut deliveries = keys.clone();
    deliveries.extend(keys.iter().step_by(2).cloned());
    deliveries.shuffle(&mut thread_rng());

    let indexer = indexer(&store);
    for key in &deliveries {
        indexer.assign(&key.stream_id, key.changeset_id).await.unwrap();
    }
    assert_consistent(&store, keys.len()).await;
}

#[tokio::test]
async fn test_execute_processes_batch_in_order() {
    let store = InMemoryKeyRangeStore::new();
    let keys = populate(&store, &[("a", 2), ("b", 2)]).await;

    indexer(&store).execute(&keys).await.unwrap();
    assert_consistent(&store, keys.len()).await;

    let positions: Vec<Option<GlobalPosition>> = store
        .all_changesets()
        .await
        .iter()
        .map(|c| c.global_position)
        .collect();
    assert_eq!(
        positions,
        vec![
            Some(GlobalPosition::new(0, 0)),
            Some(GlobalPosition::new(0, 1)),
            Some(GlobalPosition::new(0, 2)),
            Some(GlobalPosition::new(0, 3)),
        ]
    );
}

#[tokio::test]
async fn test_racing_assigners_agree() {
    let store = InMemoryKeyRangeStore::new();
    let keys = populate(&store, &[("a", 4), ("b", 4), ("c", 4)]).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let indexer = indexer(&store);
        let mut deliveries = keys.clone();
        deliveries.shuffle(&mut thread_rng());
        tasks.push(tokio::spawn(async move {
            for key in deliveries {
                indexer.assign(&key.stream_id, key.changeset_id).await?;
            }
            Ok::<_, cim_event_store::EventStoreError>(())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_consistent(&store, keys.len()).await;
}

#[tokio::test]
async fn test_same_changeset_racing_twice() {
    let store = InMemoryKeyRangeStore::new();
    populate(&store, &[("a", 3)]).await;
    let (first, second) = (indexer(&store), indexer(&store));

    let (left, right) = tokio::join!(first.assign("a", 3), second.assign("a", 3));
    assert_eq!(left.unwrap(), right.unwrap());
    assert_consistent(&store, 3).await;
}

#[tokio::test]
async fn test_recovers_from_interrupted_assignment() {
    let store = InMemoryKeyRangeStore::new();
    populate(&store, &[("a", 1), ("b", 1)]).await;
    let indexer = indexer(&store);

    // Counter advances for a/1 but the position write is lost
    store.fail_next_update_of(ChangesetKey::new("a", 1)).await;
    assert!(indexer.assign("a", 1).await.is_err());

    let counter = GlobalCounterStore::new(Arc::new(store.clone()))
        .read()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counter.last_position, Some(GlobalPosition::new(0, 0)));
    assert!(store.all_changesets().await[0].global_position.is_none());

    // Assigning anything else repairs a/1 first
    let position = indexer.assign("b", 1).await.unwrap();
    assert_eq!(position, GlobalPosition::new(0, 1));
    let changesets = store.all_changesets().await;
    assert_eq!(changesets[0].global_position, Some(GlobalPosition::new(0, 0)));

    // Redelivery of a/1 keeps the repaired position
    assert_eq!(indexer.assign("a", 1).await.unwrap(), GlobalPosition::new(0, 0));
    assert_consistent(&store, 2).await;
}

#[tokio::test]
async fn test_retry_of_interrupted_changeset_does_not_advance() {
    let store = InMemoryKeyRangeStore::new();
    populate(&store, &[("a", 2)]).await;
    let indexer = indexer(&store);

    store.fail_next_update_of(ChangesetKey::new("a", 1)).await;
    assert!(indexer.assign("a", 1).await.is_err());

    // Backfilling a/2 meets a/1 as the counter's claimant: repaired, not re-assigned
    assert_eq!(indexer.assign("a", 2).await.unwrap(), GlobalPosition::new(0, 1));
    assert_consistent(&store, 2).await;
}
