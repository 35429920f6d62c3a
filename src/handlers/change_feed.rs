// Copyright 2025 Cowboy AI, LLC.

//! Change-feed consumer
//!
//! Newly inserted changesets reported by the store are first given their
//! global positions and then published downstream. Modifications (position
//! writes, counter advances, statistics) are ignored.

use crate::changeset::{Changeset, ChangesetKey};
use crate::errors::EventStoreError;
use crate::infrastructure::global_indexer::GlobalIndexer;
use crate::infrastructure::key_range_store::{ChangeFeed, ChangeKind, ChangeRecord};
use crate::infrastructure::publisher::{PublishError, Publisher};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors processing a change batch
#[derive(Debug, Error)]
pub enum ChangeFeedError {
    /// Global index assignment failed
    #[error("Global indexing failed: {0}")]
    Index(#[from] EventStoreError),

    /// Publishing failed
    #[error("Publishing failed: {0}")]
    Publish(#[from] PublishError),
}

/// Indexes and publishes newly committed changesets
pub struct ChangeFeedProcessor {
    indexer: GlobalIndexer,
    publisher: Publisher,
}

impl ChangeFeedProcessor {
    /// Create a processor
    pub fn new(indexer: GlobalIndexer, publisher: Publisher) -> Self {
        Self { indexer, publisher }
    }

    /// Handle one batch; returns the number of new changesets in it
    pub async fn process(&self, batch: Vec<ChangeRecord>) -> Result<usize, ChangeFeedError> {
        let inserted: Vec<Changeset> = batch
            .into_iter()
            .filter(|record| record.kind == ChangeKind::Insert)
            .filter_map(|record| record.row.into_changeset())
            .collect();
        if inserted.is_empty() {
            return Ok(0);
        }

        let keys: Vec<ChangesetKey> = inserted.iter().map(Changeset::key).collect();
        debug!(count = keys.len(), "Indexing new changesets");
        self.indexer.execute(&keys).await?;
        self.publisher.publish(&inserted).await?;
        Ok(inserted.len())
    }

    /// Process batches until the feed ends or a batch fails
    pub async fn run(&self, mut feed: ChangeFeed) -> Result<(), ChangeFeedError> {
        info!("Change feed processor started");
        while let Some(batch) = feed.next().await {
            if let Err(e) = self.process(batch).await {
                error!(error = %e, "Change batch failed");
                return Err(e);
            }
        }
        info!("Change feed ended");
        Ok(())
    }
}
