// Copyright 2025 Cowboy AI, LLC.

//! NATS JetStream key-value backend
//!
//! Every row is one JSON value in a KV bucket:
//!
//! | row                 | key                          |
//! |---------------------|------------------------------|
//! | changeset           | `cs.<hex stream id>.<id>`    |
//! | global counter      | `counter.global`             |
//! | analysis state      | `analysis.state`             |
//! | global ordering     | `gp.<page>.<item>` → row key |
//!
//! Conditional inserts are `create`, conditional updates are `update` against
//! the revision that was read. The bucket has no range queries, so stream
//! orderings are resolved by binary search: changeset ids are gapless and
//! both event-id orderings are monotone in changeset id. The stream tail is
//! found by exponential probing, seeded from a cache of recently seen tails.
//!
//! Global pointers are written before the changeset's own position, so a
//! pointer whose changeset does not carry the position yet marks the end of
//! what readers can see.

use crate::changeset::Changeset;
use crate::checkpoint::{GlobalPosition, PAGE_SIZE};
use crate::config::JetStreamStoreConfig;
use crate::infrastructure::key_range_store::{
    is_reserved_stream_id, ChangeFeed, ChangeKind, ChangeRecord, Condition, Direction,
    KeyCondition, KeyRangeStore, Patch, RangeQuery, Row, RowKey, StoreError, StreamIndex,
    ANALYSIS_STREAM_ID, COUNTER_STREAM_ID,
};
use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const CHANGESET_PREFIX: &str = "cs";
const POINTER_PREFIX: &str = "gp";
const COUNTER_KEY: &str = "counter.global";
const ANALYSIS_KEY: &str = "analysis.state";

fn unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn changeset_key(stream_id: &str, changeset_id: u64) -> String {
    format!("{CHANGESET_PREFIX}.{}.{changeset_id}", hex::encode(stream_id))
}

fn pointer_key(position: GlobalPosition) -> String {
    format!("{POINTER_PREFIX}.{}.{}", position.page, position.item)
}

/// Bucket key of a row key
fn bucket_key(key: &RowKey) -> String {
    match key.stream_id.as_str() {
        COUNTER_STREAM_ID => COUNTER_KEY.to_string(),
        ANALYSIS_STREAM_ID => ANALYSIS_KEY.to_string(),
        stream_id => changeset_key(stream_id, key.changeset_id),
    }
}

/// [`KeyRangeStore`] on a JetStream key-value bucket
#[derive(Clone)]
pub struct JetStreamKeyRangeStore {
    kv: kv::Store,
    tails: Arc<Mutex<LruCache<String, u64>>>,
}

impl JetStreamKeyRangeStore {
    /// Create (or open) the bucket described by `config`
    pub async fn connect(
        client: async_nats::Client,
        config: &JetStreamStoreConfig,
    ) -> Result<Self, StoreError> {
        let context = jetstream::new(client);
        let kv = context
            .create_key_value(kv::Config {
                bucket: config.bucket.clone(),
                description: config.description.clone(),
                history: config.history,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(unavailable)?;
        info!(bucket = %config.bucket, "Opened event store bucket");
        Ok(Self::with_store(kv, config.tail_cache_size))
    }

    /// Wrap an existing bucket
    pub fn with_store(kv: kv::Store, tail_cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(tail_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            kv,
            tails: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Watch every row written to the bucket
    ///
    /// A changeset without a global position is reported as an insert, since
    /// changesets are inserted without one. Everything else is a modification.
    pub async fn change_feed(&self) -> Result<ChangeFeed, StoreError> {
        let watch = self.kv.watch_all().await.map_err(unavailable)?;
        let feed = watch.filter_map(|entry| async move {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    error!(error = %e, "Change feed watcher failed");
                    return None;
                }
            };
            match record_from_entry(&entry.key, &entry.operation, &entry.value) {
                Ok(record) => record.map(|record| vec![record]),
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Skipping undecodable change feed entry");
                    None
                }
            }
        });
        Ok(feed.boxed())
    }

    async fn read(&self, key: &str) -> Result<Option<Row>, StoreError> {
        match self.kv.get(key).await.map_err(unavailable)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn load(&self, stream_id: &str, changeset_id: u64) -> Result<Option<Changeset>, StoreError> {
        Ok(self
            .read(&changeset_key(stream_id, changeset_id))
            .await?
            .and_then(Row::into_changeset))
    }

    async fn exists(&self, stream_id: &str, changeset_id: u64) -> Result<bool, StoreError> {
        Ok(self
            .kv
            .get(changeset_key(stream_id, changeset_id))
            .await
            .map_err(unavailable)?
            .is_some())
    }

    /// Highest changeset id of the stream, 0 if it has none
    async fn tail(&self, stream_id: &str) -> Result<u64, StoreError> {
        let hint = self.tails.lock().await.get(stream_id).copied().unwrap_or(0);
        let mut known = if hint > 0 && self.exists(stream_id, hint).await? {
            hint
        } else {
            0
        };

        let mut step = 1;
        while self.exists(stream_id, known + step).await? {
            known += step;
            step *= 2;
        }
        // tail is in [known, known + step)
        let mut missing = known + step;
        while missing - known > 1 {
            let mid = known + (missing - known) / 2;
            if self.exists(stream_id, mid).await? {
                known = mid;
            } else {
                missing = mid;
            }
        }

        if known > 0 {
            self.remember_tail(stream_id, known).await;
        }
        Ok(known)
    }

    async fn remember_tail(&self, stream_id: &str, changeset_id: u64) {
        let mut tails = self.tails.lock().await;
        let current = tails.get(stream_id).copied().unwrap_or(0);
        if changeset_id > current {
            tails.put(stream_id.to_string(), changeset_id);
        }
    }

    async fn sort_key(&self, stream_id: &str, index: StreamIndex, changeset_id: u64) -> Result<u64, StoreError> {
        let changeset = self.load(stream_id, changeset_id).await?.ok_or_else(|| {
            StoreError::Unavailable(format!("changeset {stream_id}/{changeset_id} is missing"))
        })?;
        Ok(match index {
            StreamIndex::ChangesetId => changeset.changeset_id,
            StreamIndex::FirstEventId => changeset.first_event_id,
            StreamIndex::LastEventId => changeset.last_event_id,
        })
    }

    /// Smallest changeset id in `1..=tail` whose sort key is at least `target`, or `tail + 1`
    async fn lower_bound(
        &self,
        stream_id: &str,
        index: StreamIndex,
        target: u64,
        tail: u64,
    ) -> Result<u64, StoreError> {
        let (mut low, mut high) = (1, tail + 1);
        while low < high {
            let mid = low + (high - low) / 2;
            if self.sort_key(stream_id, index, mid).await? < target {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    async fn scan_stream(
        &self,
        stream_id: &str,
        index: StreamIndex,
        condition: KeyCondition,
        direction: Direction,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError> {
        let (low, high) = condition.bounds();
        if low > high {
            return Ok(Vec::new());
        }
        let tail = self.tail(stream_id).await?;
        if tail == 0 {
            return Ok(Vec::new());
        }

        let (first, last) = match index {
            StreamIndex::ChangesetId => (low.max(1), high.min(tail)),
            StreamIndex::FirstEventId | StreamIndex::LastEventId => {
                let first = self.lower_bound(stream_id, index, low, tail).await?;
                let after = self
                    .lower_bound(stream_id, index, high.saturating_add(1), tail)
                    .await?;
                (first, after.saturating_sub(1))
            }
        };
        if first > last {
            return Ok(Vec::new());
        }

        let ids: Box<dyn Iterator<Item = u64> + Send> = match direction {
            Direction::Ascending => Box::new(first..=last),
            Direction::Descending => Box::new((first..=last).rev()),
        };
        let limit = limit.unwrap_or(usize::MAX);
        let mut rows = Vec::new();
        for changeset_id in ids {
            if rows.len() >= limit {
                break;
            }
            if let Some(changeset) = self.load(stream_id, changeset_id).await? {
                rows.push(Row::Changeset(changeset));
            }
        }
        debug!(stream_id = %stream_id, ?index, rows = rows.len(), "Scanned stream");
        Ok(rows)
    }

    async fn scan_page(
        &self,
        page: u64,
        condition: KeyCondition,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError> {
        let (low, high) = condition.bounds();
        let high = high.min(PAGE_SIZE - 1);
        let limit = limit.unwrap_or(usize::MAX);
        let mut rows = Vec::new();
        let mut item = low;
        while item <= high && rows.len() < limit {
            let position = GlobalPosition::new(page, item);
            let Some(pointer) = self.kv.get(pointer_key(position)).await.map_err(unavailable)? else {
                break;
            };
            let key: RowKey = serde_json::from_slice(&pointer)?;
            match self.read(&bucket_key(&key)).await? {
                Some(row) if row.global_position() == Some(position) => rows.push(row),
                _ => break,
            }
            item += 1;
        }
        Ok(rows)
    }

    fn encode(row: &Row) -> Result<Bytes, StoreError> {
        Ok(Bytes::from(serde_json::to_vec(row)?))
    }
}

#[async_trait]
impl KeyRangeStore for JetStreamKeyRangeStore {
    async fn insert(&self, row: Row) -> Result<(), StoreError> {
        let key = row.key();
        let value = Self::encode(&row)?;
        match self.kv.create(bucket_key(&key), value).await {
            Ok(_) => {
                if !is_reserved_stream_id(&key.stream_id) {
                    self.remember_tail(&key.stream_id, key.changeset_id).await;
                }
                Ok(())
            }
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => Err(StoreError::ConditionFailed {
                key: key.to_string(),
            }),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn update(
        &self,
        key: &RowKey,
        patch: Patch,
        condition: Condition,
    ) -> Result<(), StoreError> {
        let condition_failed = || StoreError::ConditionFailed {
            key: key.to_string(),
        };
        let entry = self
            .kv
            .entry(bucket_key(key))
            .await
            .map_err(unavailable)?
            .filter(|entry| matches!(entry.operation, kv::Operation::Put))
            .ok_or_else(condition_failed)?;
        let current: Row = serde_json::from_slice(&entry.value)?;
        if let Condition::Equals(expected) = &condition {
            if &current != expected {
                return Err(condition_failed());
            }
        }

        let updated = match patch {
            Patch::GlobalPosition(position) => match current {
                Row::Changeset(mut changeset) => {
                    changeset.global_position = Some(position);
                    Row::Changeset(changeset)
                }
                _ => return Err(unavailable(format!("{key} cannot hold a global position"))),
            },
            Patch::Replace(row) => row,
        };

        if let Row::Changeset(Changeset {
            global_position: Some(position),
            ..
        }) = &updated
        {
            let pointer = Bytes::from(serde_json::to_vec(key)?);
            self.kv
                .put(pointer_key(*position), pointer)
                .await
                .map_err(unavailable)?;
        }

        match self
            .kv
            .update(bucket_key(key), Self::encode(&updated)?, entry.revision)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == kv::UpdateErrorKind::WrongLastRevision => Err(condition_failed()),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn get(&self, key: &RowKey) -> Result<Option<Row>, StoreError> {
        self.read(&bucket_key(key)).await
    }

    async fn query(&self, query: &RangeQuery) -> Result<Vec<Row>, StoreError> {
        match query {
            RangeQuery::Stream {
                stream_id,
                index,
                condition,
                direction,
                limit,
            } => {
                self.scan_stream(stream_id, *index, *condition, *direction, *limit)
                    .await
            }
            RangeQuery::GlobalPage {
                page,
                condition,
                limit,
            } => self.scan_page(*page, *condition, *limit).await,
        }
    }
}

/// Change record for a watched bucket entry; pointers and deletions carry none
fn record_from_entry(
    key: &str,
    operation: &kv::Operation,
    value: &[u8],
) -> Result<Option<ChangeRecord>, StoreError> {
    if key.starts_with(POINTER_PREFIX) || !matches!(operation, kv::Operation::Put) {
        return Ok(None);
    }
    let row: Row = serde_json::from_slice(value)?;
    let kind = match &row {
        Row::Changeset(changeset) if changeset.global_position.is_none() => ChangeKind::Insert,
        _ => ChangeKind::Modify,
    };
    Ok(Some(ChangeRecord { kind, row }))
}
