// Copyright 2025 Cowboy AI, LLC.

//! The singleton global counter
//!
//! The counter records the last global position handed out and which
//! changeset received it. It is the only cross-process coordination point of
//! the global index: every advance is a compare-and-swap on this one row.

use crate::changeset::ChangesetKey;
use crate::checkpoint::GlobalPosition;
use crate::errors::{EventStoreError, EventStoreResult};
use crate::infrastructure::key_range_store::{
    counter_key, Condition, KeyRangeStore, Patch, Row, StoreError, COUNTER_STREAM_ID,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Last assigned global position and the changeset that claimed it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCounter {
    /// Last assigned position; `None` until the first assignment
    pub last_position: Option<GlobalPosition>,
    /// Changeset that received `last_position`
    pub claimed_by: Option<ChangesetKey>,
}

impl GlobalCounter {
    /// Counter value after assigning `position` to `claimant`
    pub fn claimed(position: GlobalPosition, claimant: ChangesetKey) -> Self {
        Self {
            last_position: Some(position),
            claimed_by: Some(claimant),
        }
    }

    /// Whether the given changeset holds the current counter value
    pub fn is_claimed_by(&self, key: &ChangesetKey) -> bool {
        self.claimed_by.as_ref() == Some(key)
    }
}

/// Access to the counter row
#[derive(Clone)]
pub struct GlobalCounterStore {
    store: Arc<dyn KeyRangeStore>,
}

impl GlobalCounterStore {
    /// Create a counter store on top of a key-range store
    pub fn new(store: Arc<dyn KeyRangeStore>) -> Self {
        Self { store }
    }

    /// Read the counter; `None` if it was never initialized
    pub async fn read(&self) -> EventStoreResult<Option<GlobalCounter>> {
        match self.store.get(&counter_key()).await? {
            Some(Row::Counter(counter)) => Ok(Some(counter)),
            Some(_) => Err(EventStoreError::StoreUnavailable(format!(
                "row under {COUNTER_STREAM_ID} is not a counter"
            ))),
            None => Ok(None),
        }
    }

    /// Create the counter unless another initializer already did
    pub async fn initialize_if_absent(&self) -> EventStoreResult<()> {
        match self.store.insert(Row::Counter(GlobalCounter::default())).await {
            Ok(()) => {
                debug!("Initialized global counter");
                Ok(())
            }
            Err(StoreError::ConditionFailed { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the counter, creating it first if needed
    pub async fn read_or_initialize(&self) -> EventStoreResult<GlobalCounter> {
        if let Some(counter) = self.read().await? {
            return Ok(counter);
        }
        self.initialize_if_absent().await?;
        self.read().await?.ok_or_else(|| {
            EventStoreError::StoreUnavailable("global counter vanished after initialization".to_string())
        })
    }

    /// Replace `expected` with `next`; conflicts if another assigner got there first
    pub async fn compare_and_advance(
        &self,
        expected: &GlobalCounter,
        next: GlobalCounter,
    ) -> EventStoreResult<()> {
        self.store
            .update(
                &counter_key(),
                Patch::Replace(Row::Counter(next)),
                Condition::Equals(Row::Counter(expected.clone())),
            )
            .await
            .map_err(|e| EventStoreError::from_store(e, COUNTER_STREAM_ID, 0))
    }
}
