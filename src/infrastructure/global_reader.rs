// Copyright 2025 Cowboy AI, LLC.

//! Paginated reads over the global ordering
//!
//! The global ordering is partitioned by page, so a read that crosses a page
//! boundary takes several scans. Positions are dense: a page is only left
//! behind once its last item is taken, which lets the reader stop at the
//! first empty scan.

use crate::changeset::Changeset;
use crate::checkpoint::{to_position, Checkpoint, GlobalPosition};
use crate::errors::EventStoreResult;
use crate::infrastructure::key_range_store::{KeyCondition, KeyRangeStore, RangeQuery, Row};
use std::sync::Arc;
use tracing::debug;

/// Reads changesets in global order
#[derive(Clone)]
pub struct GlobalReader {
    store: Arc<dyn KeyRangeStore>,
}

impl GlobalReader {
    /// Create a reader on top of a key-range store
    pub fn new(store: Arc<dyn KeyRangeStore>) -> Self {
        Self { store }
    }

    /// Up to `limit` changesets from `checkpoint` onwards, ascending by position
    pub async fn fetch_global_changesets(
        &self,
        checkpoint: Checkpoint,
        limit: usize,
    ) -> EventStoreResult<Vec<Changeset>> {
        let (page, item) = to_position(checkpoint);
        let mut position = GlobalPosition::new(page, item);
        let mut changesets = Vec::with_capacity(limit);

        while changesets.len() < limit {
            let remaining = limit - changesets.len();
            // One extra row in case the counter shares the page
            let query = RangeQuery::GlobalPage {
                page: position.page,
                condition: KeyCondition::AtLeast(position.item),
                limit: Some(remaining + 1),
            };
            let rows = self.store.query(&query).await?;
            let Some(last) = rows.last().and_then(Row::global_position) else {
                break;
            };
            debug!(%position, rows = rows.len(), "Scanned global page");

            changesets.extend(rows.into_iter().filter_map(Row::into_changeset));
            position = last.next();
        }

        changesets.truncate(limit);
        Ok(changesets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::ChangesetKey;
    use crate::checkpoint::PAGE_SIZE;
    use crate::infrastructure::global_counter::{GlobalCounter, GlobalCounterStore};
    use crate::infrastructure::in_memory_store::InMemoryKeyRangeStore;
    use crate::infrastructure::stream_store::StreamStore;
    use serde_json::json;

    /// Stream "s" whose changesets sit at the given positions
    async fn positioned(positions: &[GlobalPosition]) -> InMemoryKeyRangeStore {
        let store = InMemoryKeyRangeStore::new();
        let streams = StreamStore::new(Arc::new(store.clone()));
        let mut previous: Option<Changeset> = None;
        for position in positions {
            let changeset = match &previous {
                Some(prev) => Changeset::next(prev, vec![json!("e")], json!({})),
                None => Changeset::initial("s", vec![json!("e")], json!({})),
            };
            streams.append(changeset.clone()).await.unwrap();
            streams
                .set_global_position(&changeset.key(), *position)
                .await
                .unwrap();
            previous = Some(changeset);
        }
        store
    }

    fn ids(changesets: &[Changeset]) -> Vec<u64> {
        changesets.iter().map(|c| c.changeset_id).collect()
    }

    #[tokio::test]
    async fn test_reads_across_pages() {
        let store = positioned(&[
            GlobalPosition::new(0, PAGE_SIZE - 2),
            GlobalPosition::new(0, PAGE_SIZE - 1),
            GlobalPosition::new(1, 0),
            GlobalPosition::new(1, 1),
        ])
        .await;
        let reader = GlobalReader::new(Arc::new(store));

        let changesets = reader.fetch_global_changesets(PAGE_SIZE - 2, 3).await.unwrap();
        assert_eq!(ids(&changesets), vec![1, 2, 3]);

        let changesets = reader.fetch_global_changesets(PAGE_SIZE, 10).await.unwrap();
        assert_eq!(ids(&changesets), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_counter_row_is_filtered() {
        let store = positioned(&[GlobalPosition::new(0, 0), GlobalPosition::new(0, 1)]).await;
        let counters = GlobalCounterStore::new(Arc::new(store.clone()));
        let initial = counters.read_or_initialize().await.unwrap();
        counters
            .compare_and_advance(
                &initial,
                GlobalCounter::claimed(GlobalPosition::new(0, 1), ChangesetKey::new("s", 2)),
            )
            .await
            .unwrap();
        let reader = GlobalReader::new(Arc::new(store));

        let changesets = reader.fetch_global_changesets(0, 10).await.unwrap();
        assert_eq!(ids(&changesets), vec![1, 2]);

        let changesets = reader.fetch_global_changesets(1, 1).await.unwrap();
        assert_eq!(ids(&changesets), vec![2]);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let reader = GlobalReader::new(Arc::new(InMemoryKeyRangeStore::new()));
        assert!(reader.fetch_global_changesets(0, 5).await.unwrap().is_empty());
    }
}
