// Copyright 2025 Cowboy AI, LLC.

//! Integration tests for the JetStream key-value backend
//!
//! These tests require a running NATS server with JetStream enabled:
//! ```bash
//! docker run -d --name nats-test -p 4222:4222 nats:latest -js
//! ```
//! They are skipped when no server is reachable.

use async_nats::jetstream;
use cim_event_store::infrastructure::JetStreamKeyRangeStore;
use cim_event_store::{
    Commit, ErrorCode, EventStoreConfig, EventStoreService, Expectation, FetchGlobalChangesets,
    FetchStreamEvents, JetStreamStoreConfig,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const NATS_URL: &str = "nats://localhost:4222";

async fn nats_available() -> bool {
    async_nats::connect(NATS_URL).await.is_ok()
}

struct TestBucket {
    client: async_nats::Client,
    name: String,
    store: JetStreamKeyRangeStore,
}

impl TestBucket {
    async fn create() -> Self {
        let client = async_nats::connect(NATS_URL).await.unwrap();
        let name = format!("event-store-test-{}", Uuid::new_v4().simple());
        let config = JetStreamStoreConfig {
            bucket: name.clone(),
            tail_cache_size: 16,
            ..Default::default()
        };
        let store = JetStreamKeyRangeStore::connect(client.clone(), &config)
            .await
            .unwrap();
        Self { client, name, store }
    }

    fn service(&self) -> EventStoreService {
        EventStoreService::new(Arc::new(self.store.clone()), EventStoreConfig::default())
    }

    async fn delete(self) {
        let _ = jetstream::new(self.client).delete_key_value(&self.name).await;
    }
}

#[tokio::test]
async fn test_commit_and_read_back() {
    if !nats_available().await {
        eprintln!("Skipping test: NATS not available");
        return;
    }
    let bucket = TestBucket::create().await;
    let service = bucket.service();

    service
        .commit(Commit::new("s", Expectation::NewStream, vec![json!(1), json!(2)], json!({})).unwrap())
        .await
        .unwrap();
    service
        .commit(Commit::new("s", Expectation::LastEvent(2), vec![json!(3)], json!({})).unwrap())
        .await
        .unwrap();

    let conflict = service
        .commit(Commit::new("s", Expectation::LastEvent(2), vec![json!(4)], json!({})).unwrap())
        .await
        .unwrap_err();
    assert_eq!(conflict.error, ErrorCode::OptimisticConcurrencyException);
    assert_eq!(conflict.forthcoming_changesets.unwrap().len(), 1);

    let events = service
        .fetch_events(FetchStreamEvents::new("s", Some(2), None).unwrap())
        .await
        .unwrap();
    let ids: Vec<u64> = events.events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![2, 3]);

    bucket.delete().await;
}

#[tokio::test]
async fn test_global_index_over_bucket() {
    if !nats_available().await {
        eprintln!("Skipping test: NATS not available");
        return;
    }
    let bucket = TestBucket::create().await;
    let service = bucket.service();

    for stream_id in ["a", "b"] {
        service
            .commit(Commit::new(stream_id, Expectation::NewStream, vec![json!(0)], json!({})).unwrap())
            .await
            .unwrap();
    }
    service
        .commit(Commit::new("a", Expectation::LastChangeset(1), vec![json!(1)], json!({})).unwrap())
        .await
        .unwrap();

    let indexer = service.indexer();
    indexer.assign("b", 1).await.unwrap();
    indexer.assign("a", 2).await.unwrap();
    // Redelivery
    indexer.assign("b", 1).await.unwrap();

    let query = FetchGlobalChangesets::new(0, Some(10), &service.config().reader).unwrap();
    let global = service.fetch_global_changesets(query).await.unwrap();
    let order: Vec<(&str, u64, u64)> = global
        .changesets
        .iter()
        .map(|c| (c.stream_id.as_str(), c.changeset_id, c.checkpoint))
        .collect();
    assert_eq!(order, vec![("b", 1, 0), ("a", 1, 1), ("a", 2, 2)]);
    assert_eq!(global.next_checkpoint, 3);

    bucket.delete().await;
}

#[tokio::test]
async fn test_change_feed_reports_new_changesets() {
    if !nats_available().await {
        eprintln!("Skipping test: NATS not available");
        return;
    }
    let bucket = TestBucket::create().await;
    let mut feed = bucket.store.change_feed().await.unwrap();
    let service = bucket.service();

    service
        .commit(Commit::new("s", Expectation::NewStream, vec![json!(1)], json!({})).unwrap())
        .await
        .unwrap();

    let batch = tokio::time::timeout(std::time::Duration::from_secs(5), feed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].kind, cim_event_store::infrastructure::ChangeKind::Insert);

    bucket.delete().await;
}
