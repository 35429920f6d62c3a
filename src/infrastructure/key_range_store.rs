// Copyright 2025 Cowboy AI, LLC.

//! Abstract ordered key-range store
//!
//! The engine never talks to a concrete database. Everything it needs is
//! expressed here: conditional insert, conditional update, point reads and
//! range queries over a stream partition (by changeset id or one of the two
//! event-id orderings) or over one page of the global ordering.
//!
//! Rows are keyed by `(stream_id, changeset_id)`. The global counter and the
//! analysis state live under reserved stream ids that start with `$`, which
//! real streams are not allowed to use.

use crate::changeset::{Changeset, ChangesetKey};
use crate::checkpoint::GlobalPosition;
use crate::infrastructure::global_counter::GlobalCounter;
use crate::statistics::AnalysisState;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stream id of the global counter row
pub const COUNTER_STREAM_ID: &str = "$global";

/// Stream id of the analysis state row
pub const ANALYSIS_STREAM_ID: &str = "$analysis";

/// Prefix reserved for internal rows
pub const RESERVED_PREFIX: char = '$';

/// Errors raised by a store backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A conditional insert or update did not hold
    #[error("Conditional check failed for {key}")]
    ConditionFailed {
        /// Key the condition was evaluated against
        key: String,
    },

    /// The backend could not serve the request
    #[error("{0}")]
    Unavailable(String),

    /// A stored row could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Key of any row in the store
pub type RowKey = ChangesetKey;

/// Whether a stream id is reserved for internal rows
pub fn is_reserved_stream_id(stream_id: &str) -> bool {
    stream_id.starts_with(RESERVED_PREFIX)
}

/// Key of the global counter row
pub fn counter_key() -> RowKey {
    RowKey::new(COUNTER_STREAM_ID, 0)
}

/// Key of the analysis state row
pub fn analysis_key() -> RowKey {
    RowKey::new(ANALYSIS_STREAM_ID, 0)
}

/// A stored row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Row {
    /// A stream changeset
    Changeset(Changeset),
    /// The global counter
    Counter(GlobalCounter),
    /// Projected statistics
    Analysis(AnalysisState),
}

impl Row {
    /// Key the row is stored under
    pub fn key(&self) -> RowKey {
        match self {
            Row::Changeset(changeset) => changeset.key(),
            Row::Counter(_) => counter_key(),
            Row::Analysis(_) => analysis_key(),
        }
    }

    /// Position the row occupies in the global ordering, if any
    pub fn global_position(&self) -> Option<GlobalPosition> {
        match self {
            Row::Changeset(changeset) => changeset.global_position,
            Row::Counter(counter) => counter.last_position,
            Row::Analysis(_) => None,
        }
    }

    /// Unwrap a changeset row
    pub fn into_changeset(self) -> Option<Changeset> {
        match self {
            Row::Changeset(changeset) => Some(changeset),
            _ => None,
        }
    }
}

/// Change applied by a conditional update
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Attach a global position to a changeset row
    GlobalPosition(GlobalPosition),
    /// Replace the whole row
    Replace(Row),
}

/// Condition a conditional update must satisfy
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The row exists
    Exists,
    /// The stored row equals the given one
    Equals(Row),
}

/// Secondary or primary ordering of a stream partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIndex {
    /// Primary ordering by changeset id
    ChangesetId,
    /// Secondary ordering by first event id
    FirstEventId,
    /// Secondary ordering by last event id
    LastEventId,
}

/// Sort key comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCondition {
    /// No restriction
    All,
    /// `= value`
    Eq(u64),
    /// `>= value`
    AtLeast(u64),
    /// `<= value`
    AtMost(u64),
    /// `BETWEEN low AND high`, inclusive
    Between(u64, u64),
}

impl KeyCondition {
    /// Whether a sort key satisfies the condition
    pub fn matches(&self, value: u64) -> bool {
        match *self {
            KeyCondition::All => true,
            KeyCondition::Eq(v) => value == v,
            KeyCondition::AtLeast(low) => value >= low,
            KeyCondition::AtMost(high) => value <= high,
            KeyCondition::Between(low, high) => low <= value && value <= high,
        }
    }

    /// Inclusive bounds of the condition
    pub fn bounds(&self) -> (u64, u64) {
        match *self {
            KeyCondition::All => (0, u64::MAX),
            KeyCondition::Eq(v) => (v, v),
            KeyCondition::AtLeast(low) => (low, u64::MAX),
            KeyCondition::AtMost(high) => (0, high),
            KeyCondition::Between(low, high) => (low, high),
        }
    }
}

/// Scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Lowest sort key first
    #[default]
    Ascending,
    /// Highest sort key first
    Descending,
}

/// A range query against one partition
#[derive(Debug, Clone, PartialEq)]
pub enum RangeQuery {
    /// Rows of one stream
    Stream {
        /// Partition key
        stream_id: String,
        /// Ordering the condition applies to
        index: StreamIndex,
        /// Sort key condition
        condition: KeyCondition,
        /// Scan direction
        direction: Direction,
        /// Maximum number of rows
        limit: Option<usize>,
    },
    /// Rows on one page of the global ordering, ascending by item
    GlobalPage {
        /// Page number (partition key)
        page: u64,
        /// Condition on the item within the page
        condition: KeyCondition,
        /// Maximum number of rows
        limit: Option<usize>,
    },
}

impl RangeQuery {
    /// Ascending query over a stream ordering
    pub fn stream(stream_id: impl Into<String>, index: StreamIndex, condition: KeyCondition) -> Self {
        RangeQuery::Stream {
            stream_id: stream_id.into(),
            index,
            condition,
            direction: Direction::Ascending,
            limit: None,
        }
    }

    /// Set the scan direction of a stream query
    pub fn direction(mut self, direction: Direction) -> Self {
        if let RangeQuery::Stream { direction: d, .. } = &mut self {
            *d = direction;
        }
        self
    }

    /// Cap the number of rows returned
    pub fn limit(mut self, limit: usize) -> Self {
        match &mut self {
            RangeQuery::Stream { limit: l, .. } | RangeQuery::GlobalPage { limit: l, .. } => {
                *l = Some(limit)
            }
        }
        self
    }
}

/// Kind of change reported by a change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A row was inserted
    Insert,
    /// An existing row was modified
    Modify,
}

/// One entry of a change feed
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// What happened
    pub kind: ChangeKind,
    /// The row after the change
    pub row: Row,
}

/// Stream of change batches
pub type ChangeFeed = BoxStream<'static, Vec<ChangeRecord>>;

/// Ordered key-range store with conditional writes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyRangeStore: Send + Sync {
    /// Insert a row; fails with `ConditionFailed` if the key already exists
    async fn insert(&self, row: Row) -> Result<(), StoreError>;

    /// Apply a patch if the condition holds, otherwise fail with `ConditionFailed`
    async fn update(
        &self,
        key: &RowKey,
        patch: Patch,
        condition: Condition,
    ) -> Result<(), StoreError>;

    /// Read a single row
    async fn get(&self, key: &RowKey) -> Result<Option<Row>, StoreError>;

    /// Run a range query
    async fn query(&self, query: &RangeQuery) -> Result<Vec<Row>, StoreError>;
}
