// Copyright 2025 Cowboy AI, LLC.

//! Global index assignment
//!
//! Changesets are stored per stream. The global index retrofits a total
//! order across all streams by handing out `(page, item)` positions from a
//! single counter row, driven by an at-least-once change feed that may
//! redeliver or reorder notifications.
//!
//! ```mermaid
//! graph TD
//!     A[notification s/n] --> B{s/n positioned?}
//!     B -->|yes| Z[done]
//!     B -->|no| C[collect unpositioned predecessors of s/n]
//!     C --> D[for each, ascending]
//!     D --> E[read counter]
//!     E --> F{claimant positioned?}
//!     F -->|no| G[repair claimant]
//!     G --> H
//!     F -->|yes| H{claimant is this changeset?}
//!     H -->|yes| Z2[done]
//!     H -->|no| I[CAS counter to next position]
//!     I -->|conflict| E
//!     I -->|ok| J[write position on changeset]
//! ```
//!
//! The counter is the source of truth; the position stored on a changeset is
//! a mirror. If a process dies between the counter advance and the changeset
//! write, whoever reads the counter next writes the missing mirror before
//! advancing.

use crate::changeset::{Changeset, ChangesetKey};
use crate::checkpoint::{next_position, GlobalPosition};
use crate::config::IndexerConfig;
use crate::errors::{EventStoreError, EventStoreResult};
use crate::infrastructure::global_counter::{GlobalCounter, GlobalCounterStore};
use crate::infrastructure::stream_store::StreamStore;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Assigns global positions to changesets
#[derive(Clone)]
pub struct GlobalIndexer {
    streams: StreamStore,
    counter: GlobalCounterStore,
    config: IndexerConfig,
}

impl GlobalIndexer {
    /// Create an indexer
    pub fn new(streams: StreamStore, counter: GlobalCounterStore, config: IndexerConfig) -> Self {
        Self {
            streams,
            counter,
            config,
        }
    }

    /// Assign positions to a batch of changesets, in the given order
    pub async fn execute(&self, changesets: &[ChangesetKey]) -> EventStoreResult<()> {
        for key in changesets {
            self.assign(&key.stream_id, key.changeset_id).await?;
        }
        Ok(())
    }

    /// Make sure the changeset, and every predecessor in its stream, has a position
    pub async fn assign(&self, stream_id: &str, changeset_id: u64) -> EventStoreResult<GlobalPosition> {
        let key = ChangesetKey::new(stream_id, changeset_id);
        info!(stream_id = %stream_id, changeset_id, "Assign global index");

        let changeset = self
            .streams
            .fetch(&key)
            .await?
            .ok_or_else(|| EventStoreError::NotFound(format!("changeset {key}")))?;
        if let Some(position) = changeset.global_position {
            debug!(%key, %position, "Already indexed");
            return Ok(position);
        }

        let mut backlog = self.unindexed_predecessors(&changeset).await?;
        backlog.push(key);

        let mut position = GlobalPosition::FIRST;
        for pending in &backlog {
            position = self.assign_with_retry(pending).await?;
        }
        Ok(position)
    }

    /// Keys of predecessors without a position, ascending by changeset id
    ///
    /// Positions are assigned in changeset order within a stream, so the
    /// walk stops at the first predecessor that already has one.
    async fn unindexed_predecessors(&self, changeset: &Changeset) -> EventStoreResult<Vec<ChangesetKey>> {
        let mut backlog = Vec::new();
        let mut upper = changeset.changeset_id;
        while upper > 1 {
            let lower = upper.saturating_sub(self.config.backfill_batch.max(1)).max(1);
            let batch = self
                .streams
                .fetch_by_changeset_range(&changeset.stream_id, Some(lower), Some(upper - 1))
                .await?;
            let mut reached_indexed = false;
            for predecessor in batch.iter().rev() {
                if predecessor.global_position.is_some() {
                    reached_indexed = true;
                    break;
                }
                backlog.push(predecessor.key());
            }
            if reached_indexed {
                break;
            }
            upper = lower;
        }
        if !backlog.is_empty() {
            debug!(
                stream_id = %changeset.stream_id,
                count = backlog.len(),
                "Backfilling unindexed predecessors"
            );
        }
        backlog.reverse();
        Ok(backlog)
    }

    async fn assign_with_retry(&self, key: &ChangesetKey) -> EventStoreResult<GlobalPosition> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        for attempt in 1..=max_attempts {
            match self.assign_one(key).await {
                Err(EventStoreError::ConcurrencyConflict { .. }) if attempt < max_attempts => {
                    debug!(%key, attempt, "Global counter contended, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_millis(self.config.max_backoff_ms));
                }
                Err(EventStoreError::ConcurrencyConflict { .. }) => {
                    warn!(%key, attempts = max_attempts, "Giving up on contended global counter");
                    return Err(EventStoreError::CounterContended {
                        attempts: max_attempts,
                    });
                }
                result => return result,
            }
        }
        Err(EventStoreError::CounterContended {
            attempts: max_attempts,
        })
    }

    /// One attempt at positioning a single changeset
    async fn assign_one(&self, key: &ChangesetKey) -> EventStoreResult<GlobalPosition> {
        // Counter first: any assignment after this read makes the CAS below fail
        let counter = self.counter.read_or_initialize().await?;
        self.repair_claimant(&counter).await?;

        if let (true, Some(position)) = (counter.is_claimed_by(key), counter.last_position) {
            return Ok(position);
        }

        // A concurrent assigner may have finished this changeset since the last attempt
        let changeset = self
            .streams
            .fetch(key)
            .await?
            .ok_or_else(|| EventStoreError::NotFound(format!("changeset {key}")))?;
        if let Some(position) = changeset.global_position {
            return Ok(position);
        }

        let next = next_position(counter.last_position);
        self.counter
            .compare_and_advance(&counter, GlobalCounter::claimed(next, key.clone()))
            .await?;
        self.streams.set_global_position(key, next).await?;
        info!(%key, position = %next, "Assigned global position");
        Ok(next)
    }

    /// Write the counter's position onto its claimant if that write never landed
    async fn repair_claimant(&self, counter: &GlobalCounter) -> EventStoreResult<()> {
        let (Some(claimant), Some(position)) = (&counter.claimed_by, counter.last_position) else {
            return Ok(());
        };
        match self.streams.fetch(claimant).await? {
            Some(changeset) if changeset.global_position.is_none() => {
                warn!(key = %claimant, %position, "Repairing incomplete global index assignment");
                self.streams.set_global_position(claimant, position).await
            }
            Some(_) => Ok(()),
            None => {
                warn!(key = %claimant, "Global counter claimant does not exist");
                Ok(())
            }
        }
    }
}
