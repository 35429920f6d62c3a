// Copyright 2025 Cowboy AI, LLC.

//! Store-wide statistics projected from the global ordering

use crate::changeset::Changeset;
use crate::checkpoint::Checkpoint;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Aggregated statistics over every globally indexed changeset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisState {
    /// Number of streams seen
    pub total_streams: u64,
    /// Number of changesets seen
    pub total_changesets: u64,
    /// Number of events seen
    pub total_events: u64,
    /// Highest changeset id seen in any stream
    pub max_stream_length: u64,
    /// Checkpoint the statistics have been projected up to (exclusive)
    pub version: Checkpoint,
}

impl AnalysisState {
    /// Fold one changeset into the statistics
    pub fn apply(&mut self, changeset: &Changeset) {
        if changeset.changeset_id == 1 {
            self.total_streams += 1;
        }
        self.total_changesets += 1;
        self.total_events += changeset.events.len() as u64;
        self.max_stream_length = self.max_stream_length.max(changeset.changeset_id);
    }
}
