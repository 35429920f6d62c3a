// Copyright 2025 Cowboy AI, LLC.

//! Statistics projection over the global ordering
//!
//! Each run continues from the checkpoint the stored state was projected up
//! to and stores the new state under optimistic concurrency: a concurrent
//! projector that stored first makes this run fail with a conflict instead
//! of double counting.

use crate::config::ProjectorConfig;
use crate::errors::{EventStoreError, EventStoreResult};
use crate::infrastructure::global_reader::GlobalReader;
use crate::infrastructure::key_range_store::{
    analysis_key, Condition, KeyRangeStore, Patch, Row, ANALYSIS_STREAM_ID,
};
use crate::statistics::AnalysisState;
use std::sync::Arc;
use tracing::info;

/// Read the projected statistics, if any
pub async fn load_analysis_state(store: &dyn KeyRangeStore) -> EventStoreResult<Option<AnalysisState>> {
    match store.get(&analysis_key()).await? {
        Some(Row::Analysis(state)) => Ok(Some(state)),
        Some(_) => Err(EventStoreError::StoreUnavailable(format!(
            "row under {ANALYSIS_STREAM_ID} is not an analysis state"
        ))),
        None => Ok(None),
    }
}

/// Projects [`AnalysisState`] from globally indexed changesets
#[derive(Clone)]
pub struct AnalysisProjector {
    store: Arc<dyn KeyRangeStore>,
    reader: GlobalReader,
    config: ProjectorConfig,
}

impl AnalysisProjector {
    /// Create a projector
    pub fn new(store: Arc<dyn KeyRangeStore>, config: ProjectorConfig) -> Self {
        Self {
            reader: GlobalReader::new(store.clone()),
            store,
            config,
        }
    }

    /// Project every changeset indexed since the last run and store the result
    pub async fn execute(&self) -> EventStoreResult<AnalysisState> {
        let previous = load_analysis_state(self.store.as_ref()).await?;
        let mut state = previous.clone().unwrap_or_default();
        info!(version = state.version, "Analysis projection started");

        loop {
            let changesets = self
                .reader
                .fetch_global_changesets(state.version, self.config.query_limit)
                .await?;
            let Some(last) = changesets.last().and_then(|c| c.global_position) else {
                break;
            };
            for changeset in &changesets {
                state.apply(changeset);
            }
            state.version = last.to_checkpoint() + 1;
        }

        let result = match &previous {
            None => self.store.insert(Row::Analysis(state.clone())).await,
            Some(previous) if previous == &state => Ok(()),
            Some(previous) => {
                self.store
                    .update(
                        &analysis_key(),
                        Patch::Replace(Row::Analysis(state.clone())),
                        Condition::Equals(Row::Analysis(previous.clone())),
                    )
                    .await
            }
        };
        result.map_err(|e| EventStoreError::from_store(e, ANALYSIS_STREAM_ID, 0))?;

        info!(
            version = state.version,
            total_changesets = state.total_changesets,
            "Analysis projection finished"
        );
        Ok(state)
    }
}
