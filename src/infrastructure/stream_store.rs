// Copyright 2025 Cowboy AI, LLC.

//! Per-stream changeset access
//!
//! Appends are conditional inserts keyed by `(stream_id, changeset_id)`:
//! whoever inserts a slot first wins, everybody else gets a concurrency
//! conflict. There are no locks and no coordinator.
//!
//! Event-range reads avoid scanning whole streams by using the two secondary
//! orderings (by first event id and by last event id).

use crate::changeset::{Changeset, ChangesetKey};
use crate::checkpoint::GlobalPosition;
use crate::errors::{EventStoreError, EventStoreResult};
use crate::infrastructure::key_range_store::{
    Condition, Direction, KeyCondition, KeyRangeStore, Patch, RangeQuery, Row, StoreError,
    StreamIndex,
};
use std::sync::Arc;
use tracing::debug;

/// Attempts at a position write that keeps losing revision races to non-position writes
const POSITION_WRITE_ATTEMPTS: u32 = 3;

/// Append and range-read operations over stream changesets
#[derive(Clone)]
pub struct StreamStore {
    store: Arc<dyn KeyRangeStore>,
}

impl StreamStore {
    /// Create a stream store on top of a key-range store
    pub fn new(store: Arc<dyn KeyRangeStore>) -> Self {
        Self { store }
    }

    /// Underlying key-range store
    pub fn backend(&self) -> &Arc<dyn KeyRangeStore> {
        &self.store
    }

    /// Persist a new changeset; conflicts if its slot is already taken
    pub async fn append(&self, changeset: Changeset) -> EventStoreResult<()> {
        let key = changeset.key();
        // Event-id orderings need every changeset to own at least one event id
        if changeset.events.is_empty() {
            return Err(EventStoreError::validation(format!(
                "changeset {key} has no events"
            )));
        }
        debug!(stream_id = %key.stream_id, changeset_id = key.changeset_id, "Appending changeset");
        self.store
            .insert(Row::Changeset(changeset))
            .await
            .map_err(|e| EventStoreError::from_store(e, &key.stream_id, key.changeset_id))
    }

    /// Read one changeset
    pub async fn fetch(&self, key: &ChangesetKey) -> EventStoreResult<Option<Changeset>> {
        Ok(self.store.get(key).await?.and_then(Row::into_changeset))
    }

    /// Most recent changeset of the stream, if the stream exists
    pub async fn fetch_last(&self, stream_id: &str) -> EventStoreResult<Option<Changeset>> {
        let query = RangeQuery::stream(stream_id, StreamIndex::ChangesetId, KeyCondition::All)
            .direction(Direction::Descending)
            .limit(1);
        self.first_of(&query).await
    }

    /// Changesets with ids in `[from, to]`, ascending; both open means the whole stream
    pub async fn fetch_by_changeset_range(
        &self,
        stream_id: &str,
        from: Option<u64>,
        to: Option<u64>,
    ) -> EventStoreResult<Vec<Changeset>> {
        let condition = match (from, to) {
            (Some(from), Some(to)) => KeyCondition::Between(from, to),
            (Some(from), None) => KeyCondition::AtLeast(from),
            (None, Some(to)) => KeyCondition::AtMost(to),
            (None, None) => KeyCondition::AtLeast(1),
        };
        self.scan(RangeQuery::stream(stream_id, StreamIndex::ChangesetId, condition))
            .await
    }

    /// Up to `limit` changesets with ids from `from` onwards
    pub async fn fetch_changesets_after(
        &self,
        stream_id: &str,
        from: u64,
        limit: usize,
    ) -> EventStoreResult<Vec<Changeset>> {
        self.scan(
            RangeQuery::stream(stream_id, StreamIndex::ChangesetId, KeyCondition::AtLeast(from))
                .limit(limit),
        )
        .await
    }

    /// Changesets whose event interval intersects `[from, to]`, ascending
    pub async fn fetch_by_event_range(
        &self,
        stream_id: &str,
        from: Option<u64>,
        to: Option<u64>,
    ) -> EventStoreResult<Vec<Changeset>> {
        match (from, to) {
            (Some(from), Some(to)) if from == to => {
                Ok(self.covering(stream_id, from).await?.into_iter().collect())
            }
            (Some(from), Some(to)) => {
                let Some(head) = self.covering(stream_id, from).await? else {
                    return Ok(Vec::new());
                };
                if head.last_event_id >= to {
                    return Ok(vec![head]);
                }
                let head_id = head.changeset_id;
                let rest = self
                    .scan(RangeQuery::stream(
                        stream_id,
                        StreamIndex::FirstEventId,
                        KeyCondition::Between(from, to),
                    ))
                    .await?;
                let mut changesets = vec![head];
                changesets.extend(rest.into_iter().filter(|c| c.changeset_id > head_id));
                Ok(changesets)
            }
            (Some(from), None) => {
                self.scan(RangeQuery::stream(
                    stream_id,
                    StreamIndex::LastEventId,
                    KeyCondition::AtLeast(from),
                ))
                .await
            }
            (None, Some(to)) => {
                self.scan(RangeQuery::stream(
                    stream_id,
                    StreamIndex::FirstEventId,
                    KeyCondition::AtMost(to),
                ))
                .await
            }
            (None, None) => self.fetch_by_changeset_range(stream_id, None, None).await,
        }
    }

    /// Up to `limit` changesets holding events from `from` onwards
    pub async fn fetch_events_after(
        &self,
        stream_id: &str,
        from: u64,
        limit: usize,
    ) -> EventStoreResult<Vec<Changeset>> {
        self.scan(
            RangeQuery::stream(stream_id, StreamIndex::LastEventId, KeyCondition::AtLeast(from))
                .limit(limit),
        )
        .await
    }

    /// Attach a global position to an existing changeset
    ///
    /// Several assigners may write the same position concurrently (an
    /// assigner and a claimant repair). Losing that write race is success as
    /// long as the row ends up holding `position`.
    pub async fn set_global_position(
        &self,
        key: &ChangesetKey,
        position: GlobalPosition,
    ) -> EventStoreResult<()> {
        for attempt in 1..=POSITION_WRITE_ATTEMPTS {
            match self
                .store
                .update(key, Patch::GlobalPosition(position), Condition::Exists)
                .await
            {
                Ok(()) => return Ok(()),
                Err(StoreError::ConditionFailed { .. }) => {}
                Err(e) => return Err(e.into()),
            }

            let Some(changeset) = self.fetch(key).await? else {
                return Err(EventStoreError::NotFound(format!("changeset {key}")));
            };
            match changeset.global_position {
                Some(stored) if stored == position => {
                    debug!(%key, %position, "Position already written by a concurrent assigner");
                    return Ok(());
                }
                Some(stored) => {
                    return Err(EventStoreError::Inconsistent(format!(
                        "changeset {key} holds {stored}, refusing to overwrite with {position}"
                    )));
                }
                None => debug!(%key, attempt, "Position write lost a race, retrying"),
            }
        }
        Err(EventStoreError::ConcurrencyConflict {
            stream_id: key.stream_id.clone(),
            changeset_id: key.changeset_id,
        })
    }

    /// The changeset whose event interval covers `event_id`
    async fn covering(&self, stream_id: &str, event_id: u64) -> EventStoreResult<Option<Changeset>> {
        let query = RangeQuery::stream(
            stream_id,
            StreamIndex::LastEventId,
            KeyCondition::AtLeast(event_id),
        )
        .limit(1);
        Ok(self
            .first_of(&query)
            .await?
            .filter(|changeset| changeset.first_event_id <= event_id))
    }

    async fn first_of(&self, query: &RangeQuery) -> EventStoreResult<Option<Changeset>> {
        Ok(self
            .store
            .query(query)
            .await?
            .into_iter()
            .find_map(Row::into_changeset))
    }

    async fn scan(&self, query: RangeQuery) -> EventStoreResult<Vec<Changeset>> {
        Ok(self
            .store
            .query(&query)
            .await?
            .into_iter()
            .filter_map(Row::into_changeset)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory_store::InMemoryKeyRangeStore;
    use crate::infrastructure::key_range_store::MockKeyRangeStore;
    use serde_json::json;

    /// Stream "s" with changesets holding events 1-4, 5-7 and 8-9
    async fn three_changesets() -> StreamStore {
        let streams = StreamStore::new(Arc::new(InMemoryKeyRangeStore::new()));
        let first = Changeset::initial("s", vec![json!(1), json!(2), json!(3), json!(4)], json!({}));
        let second = Changeset::next(&first, vec![json!(5), json!(6), json!(7)], json!({}));
        let third = Changeset::next(&second, vec![json!(8), json!(9)], json!({}));
        for changeset in [first, second, third] {
            streams.append(changeset).await.unwrap();
        }
        streams
    }

    fn ids(changesets: &[Changeset]) -> Vec<u64> {
        changesets.iter().map(|c| c.changeset_id).collect()
    }

    #[tokio::test]
    async fn test_append_conflict() {
        let streams = three_changesets().await;
        let duplicate = Changeset::initial("s", vec![json!("x")], json!({}));

        let err = streams.append(duplicate).await.unwrap_err();
        assert_eq!(
            err,
            EventStoreError::ConcurrencyConflict {
                stream_id: "s".to_string(),
                changeset_id: 1
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_last() {
        let streams = three_changesets().await;
        assert_eq!(streams.fetch_last("s").await.unwrap().unwrap().changeset_id, 3);
        assert!(streams.fetch_last("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_changeset_ranges() {
        let streams = three_changesets().await;
        let fetch = |from, to| {
            let streams = streams.clone();
            async move { ids(&streams.fetch_by_changeset_range("s", from, to).await.unwrap()) }
        };

        assert_eq!(fetch(None, None).await, vec![1, 2, 3]);
        assert_eq!(fetch(Some(2), None).await, vec![2, 3]);
        assert_eq!(fetch(None, Some(2)).await, vec![1, 2]);
        assert_eq!(fetch(Some(2), Some(2)).await, vec![2]);
        assert_eq!(fetch(Some(4), None).await, Vec::<u64>::new());
    }

    #[tokio::test]
    async fn test_event_ranges() {
        let streams = three_changesets().await;
        let fetch = |from, to| {
            let streams = streams.clone();
            async move { ids(&streams.fetch_by_event_range("s", from, to).await.unwrap()) }
        };

        assert_eq!(fetch(Some(3), Some(3)).await, vec![1]);
        assert_eq!(fetch(Some(5), Some(5)).await, vec![2]);
        assert_eq!(fetch(Some(3), Some(6)).await, vec![1, 2]);
        assert_eq!(fetch(Some(2), Some(4)).await, vec![1]);
        // Upper boundary on the first event of a changeset
        assert_eq!(fetch(Some(5), Some(8)).await, vec![2, 3]);
        assert_eq!(fetch(Some(1), Some(100)).await, vec![1, 2, 3]);
        assert_eq!(fetch(Some(6), None).await, vec![2, 3]);
        assert_eq!(fetch(None, Some(5)).await, vec![1, 2]);
        assert_eq!(fetch(None, None).await, vec![1, 2, 3]);
        assert_eq!(fetch(Some(10), Some(12)).await, Vec::<u64>::new());
        assert_eq!(fetch(Some(10), Some(10)).await, Vec::<u64>::new());
    }

    #[tokio::test]
    async fn test_set_global_position_on_missing_changeset() {
        let streams = three_changesets().await;
        let err = streams
            .set_global_position(&ChangesetKey::new("s", 9), GlobalPosition::FIRST)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    fn positioned(position: Option<GlobalPosition>) -> Row {
        let mut changeset = Changeset::initial("s", vec![json!(1)], json!({}));
        changeset.global_position = position;
        Row::Changeset(changeset)
    }

    fn lost_revision_store(stored: Row) -> MockKeyRangeStore {
        let mut store = MockKeyRangeStore::new();
        store.expect_update().returning(|key, _, _| {
            Err(StoreError::ConditionFailed {
                key: key.to_string(),
            })
        });
        store
            .expect_get()
            .returning(move |_| Ok(Some(stored.clone())));
        store
    }

    #[tokio::test]
    async fn test_position_write_tolerates_concurrent_identical_write() {
        let position = GlobalPosition::new(0, 4);
        let streams = StreamStore::new(Arc::new(lost_revision_store(positioned(Some(position)))));

        streams
            .set_global_position(&ChangesetKey::new("s", 1), position)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_position_write_refuses_to_overwrite_other_position() {
        let streams = StreamStore::new(Arc::new(lost_revision_store(positioned(Some(
            GlobalPosition::new(0, 3),
        )))));

        let err = streams
            .set_global_position(&ChangesetKey::new("s", 1), GlobalPosition::new(0, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn test_position_write_gives_up_after_repeated_lost_races() {
        let streams = StreamStore::new(Arc::new(lost_revision_store(positioned(None))));

        let err = streams
            .set_global_position(&ChangesetKey::new("s", 1), GlobalPosition::FIRST)
            .await
            .unwrap_err();
        assert!(err.is_concurrency_conflict());
    }

    #[tokio::test]
    async fn test_append_rejects_changeset_without_events() {
        let streams = StreamStore::new(Arc::new(InMemoryKeyRangeStore::new()));

        let err = streams
            .append(Changeset::initial("s", vec![], json!({})))
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(streams.fetch_last("s").await.unwrap().is_none());

        // The stream is still free for a real first changeset
        streams
            .append(Changeset::initial("s", vec![json!(1)], json!({})))
            .await
            .unwrap();
        assert_eq!(streams.fetch_last("s").await.unwrap().unwrap().last_event_id, 1);
    }

    #[tokio::test]
    async fn test_store_errors_pass_through() {
        let mut store = MockKeyRangeStore::new();
        store
            .expect_insert()
            .returning(|_| Err(StoreError::Unavailable("provisioned throughput exceeded".to_string())));
        store
            .expect_query()
            .returning(|_| Err(StoreError::Unavailable("timeout".to_string())));
        let streams = StreamStore::new(Arc::new(store));

        let err = streams
            .append(Changeset::initial("s", vec![json!(1)], json!({})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EventStoreError::StoreUnavailable("provisioned throughput exceeded".to_string())
        );

        let err = streams.fetch_last("s").await.unwrap_err();
        assert_eq!(err, EventStoreError::StoreUnavailable("timeout".to_string()));
    }
}
