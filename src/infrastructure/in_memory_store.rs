// Copyright 2025 Cowboy AI, LLC.

//! In-memory key-range store
//!
//! Keeps the same orderings a partitioned store with secondary indexes
//! would: a primary ordering per stream, two per-stream event-id orderings
//! and one global ordering by position. Every write is reported on the
//! change feed in commit order. Faults can be injected to exercise outage
//! and crash-recovery paths.

use crate::changeset::Changeset;
use crate::checkpoint::GlobalPosition;
use crate::infrastructure::key_range_store::{
    ChangeFeed, ChangeKind, ChangeRecord, Condition, Direction, KeyRangeStore, Patch, RangeQuery,
    Row, RowKey, StoreError, StreamIndex,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Default)]
struct Tables {
    /// partition -> changeset id -> row
    rows: HashMap<String, BTreeMap<u64, Row>>,
    /// partition -> first event id -> changeset id
    by_first_event: HashMap<String, BTreeMap<u64, u64>>,
    /// partition -> last event id -> changeset id
    by_last_event: HashMap<String, BTreeMap<u64, u64>>,
    /// every row carrying a position, counter included
    global: BTreeSet<(GlobalPosition, RowKey)>,
    subscribers: Vec<mpsc::UnboundedSender<Vec<ChangeRecord>>>,
}

impl Tables {
    fn row(&self, key: &RowKey) -> Option<&Row> {
        self.rows.get(&key.stream_id)?.get(&key.changeset_id)
    }

    fn index(&mut self, row: &Row) {
        let key = row.key();
        if let Row::Changeset(changeset) = row {
            self.by_first_event
                .entry(key.stream_id.clone())
                .or_default()
                .insert(changeset.first_event_id, key.changeset_id);
            self.by_last_event
                .entry(key.stream_id.clone())
                .or_default()
                .insert(changeset.last_event_id, key.changeset_id);
        }
        if let Some(position) = row.global_position() {
            self.global.insert((position, key));
        }
    }

    fn unindex_position(&mut self, row: &Row) {
        if let Some(position) = row.global_position() {
            self.global.remove(&(position, row.key()));
        }
    }

    fn publish(&mut self, kind: ChangeKind, row: &Row) {
        let record = ChangeRecord {
            kind,
            row: row.clone(),
        };
        self.subscribers
            .retain(|subscriber| subscriber.send(vec![record.clone()]).is_ok());
    }

    fn scan_stream(
        &self,
        stream_id: &str,
        index: StreamIndex,
        low: u64,
        high: u64,
    ) -> Vec<Row> {
        let Some(rows) = self.rows.get(stream_id) else {
            return Vec::new();
        };
        let ids: Vec<u64> = match index {
            StreamIndex::ChangesetId => rows.range(low..=high).map(|(id, _)| *id).collect(),
            StreamIndex::FirstEventId => self
                .by_first_event
                .get(stream_id)
                .map(|ordering| ordering.range(low..=high).map(|(_, id)| *id).collect())
                .unwrap_or_default(),
            StreamIndex::LastEventId => self
                .by_last_event
                .get(stream_id)
                .map(|ordering| ordering.range(low..=high).map(|(_, id)| *id).collect())
                .unwrap_or_default(),
        };
        ids.into_iter()
            .filter_map(|id| rows.get(&id).cloned())
            .collect()
    }

    fn scan_page(&self, page: u64, low: u64, high: u64) -> Vec<Row> {
        let start = (GlobalPosition::new(page, low), RowKey::new(String::new(), 0));
        self.global
            .range(start..)
            .take_while(|(position, _)| position.page == page && position.item <= high)
            .filter_map(|(_, key)| self.row(key).cloned())
            .collect()
    }
}

#[derive(Default)]
struct Faults {
    unavailable: bool,
    failing_updates: HashSet<RowKey>,
}

/// In-memory implementation of [`KeyRangeStore`]
#[derive(Clone, Default)]
pub struct InMemoryKeyRangeStore {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<RwLock<Faults>>,
}

impl InMemoryKeyRangeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every write made from now on
    pub async fn change_feed(&self) -> ChangeFeed {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.tables.write().await.subscribers.push(sender);
        UnboundedReceiverStream::new(receiver).boxed()
    }

    /// Make every operation fail as if the backend were down
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.faults.write().await.unavailable = unavailable;
    }

    /// Make the next update of `key` fail, simulating a crash before the write lands
    pub async fn fail_next_update_of(&self, key: RowKey) {
        self.faults.write().await.failing_updates.insert(key);
    }

    /// Snapshot of every changeset, ordered by stream and changeset id
    pub async fn all_changesets(&self) -> Vec<Changeset> {
        let tables = self.tables.read().await;
        let mut changesets: Vec<Changeset> = tables
            .rows
            .values()
            .flat_map(|rows| rows.values())
            .filter_map(|row| row.clone().into_changeset())
            .collect();
        changesets.sort_by(|a, b| a.key().cmp(&b.key()));
        changesets
    }

    async fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.read().await.unavailable {
            return Err(StoreError::Unavailable(
                "in-memory store is marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyRangeStore for InMemoryKeyRangeStore {
    async fn insert(&self, row: Row) -> Result<(), StoreError> {
        self.check_available().await?;
        let key = row.key();
        let mut tables = self.tables.write().await;
        let partition = tables.rows.entry(key.stream_id.clone()).or_default();
        if partition.contains_key(&key.changeset_id) {
            return Err(StoreError::ConditionFailed {
                key: key.to_string(),
            });
        }
        partition.insert(key.changeset_id, row.clone());
        tables.index(&row);
        tables.publish(ChangeKind::Insert, &row);
        Ok(())
    }

    async fn update(
        &self,
        key: &RowKey,
        patch: Patch,
        condition: Condition,
    ) -> Result<(), StoreError> {
        self.check_available().await?;
        if self.faults.write().await.failing_updates.remove(key) {
            return Err(StoreError::Unavailable(format!(
                "injected failure updating {key}"
            )));
        }

        let mut tables = self.tables.write().await;
        let condition_failed = || StoreError::ConditionFailed {
            key: key.to_string(),
        };
        let current = tables.row(key).cloned().ok_or_else(condition_failed)?;
        if let Condition::Equals(expected) = &condition {
            if &current != expected {
                return Err(condition_failed());
            }
        }

        let updated = match patch {
            Patch::GlobalPosition(position) => match current.clone() {
                Row::Changeset(mut changeset) => {
                    changeset.global_position = Some(position);
                    Row::Changeset(changeset)
                }
                _ => {
                    return Err(StoreError::Unavailable(format!(
                        "{key} cannot hold a global position"
                    )))
                }
            },
            Patch::Replace(row) => {
                if &row.key() != key {
                    return Err(StoreError::Unavailable(format!(
                        "replacement row {} does not match {key}",
                        row.key()
                    )));
                }
                row
            }
        };

        tables.unindex_position(&current);
        if let Some(partition) = tables.rows.get_mut(&key.stream_id) {
            partition.insert(key.changeset_id, updated.clone());
        }
        tables.index(&updated);
        tables.publish(ChangeKind::Modify, &updated);
        Ok(())
    }

    async fn get(&self, key: &RowKey) -> Result<Option<Row>, StoreError> {
        self.check_available().await?;
        Ok(self.tables.read().await.row(key).cloned())
    }

    async fn query(&self, query: &RangeQuery) -> Result<Vec<Row>, StoreError> {
        self.check_available().await?;
        let tables = self.tables.read().await;
        let (mut rows, limit) = match query {
            RangeQuery::Stream {
                stream_id,
                index,
                condition,
                direction,
                limit,
            } => {
                let (low, high) = condition.bounds();
                if low > high {
                    return Ok(Vec::new());
                }
                let mut rows = tables.scan_stream(stream_id, *index, low, high);
                if *direction == Direction::Descending {
                    rows.reverse();
                }
                (rows, *limit)
            }
            RangeQuery::GlobalPage {
                page,
                condition,
                limit,
            } => {
                let (low, high) = condition.bounds();
                if low > high {
                    return Ok(Vec::new());
                }
                (tables.scan_page(*page, low, high), *limit)
            }
        };
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
