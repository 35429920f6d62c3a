// Copyright 2025 Cowboy AI, LLC.

//! Response bodies of the request handlers
//!
//! Handlers return `Result<Body, ErrorResponse>`. Mapping these onto a wire
//! protocol is left to the caller; [`ErrorCode::status`] gives the
//! HTTP-style status each error belongs to.

use crate::changeset::{Changeset, NumberedEvent};
use crate::checkpoint::Checkpoint;
use crate::errors::EventStoreError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Machine-readable error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No stream id in the request
    MissingStreamId,
    /// Stream id uses the reserved prefix
    ReservedStreamId,
    /// Expected changeset id is not a non-negative integer
    InvalidExpectedChangesetId,
    /// Expected event id is not a non-negative integer
    InvalidExpectedEventId,
    /// Both expectations were given
    AmbiguousExpectation,
    /// Commit without events
    MissingEvents,
    /// Request body could not be decoded
    InvalidRequest,
    /// Changeset range filter is malformed or inverted
    InvalidChangesetFilteringParams,
    /// Event range filter is malformed or inverted
    InvalidEventFilteringParams,
    /// Checkpoint is not a non-negative integer
    InvalidCheckpoint,
    /// Limit is not a positive integer within bounds
    InvalidLimit,
    /// The stream has no changesets
    StreamNotFound,
    /// The caller's expectation of the stream tail is outdated
    OptimisticConcurrencyException,
    /// The analysis projection has not run yet
    StatisticsNotReady,
    /// Anything the caller cannot fix
    InternalError,
}

impl ErrorCode {
    /// HTTP-style status of the code
    pub fn status(self) -> u16 {
        match self {
            ErrorCode::StreamNotFound | ErrorCode::StatisticsNotReady => 404,
            ErrorCode::OptimisticConcurrencyException => 409,
            ErrorCode::InternalError => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&code)
    }
}

/// Error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
    /// Stream the request was about, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    /// Error code
    pub error: ErrorCode,
    /// Human-readable description
    pub message: String,
    /// Changesets committed after the caller's expectation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forthcoming_changesets: Option<Vec<ChangesetBody>>,
}

impl ErrorResponse {
    /// Error about no particular stream
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stream_id: None,
            error,
            message: message.into(),
            forthcoming_changesets: None,
        }
    }

    /// Error about a stream
    pub fn for_stream(stream_id: impl Into<String>, error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stream_id: Some(stream_id.into()),
            ..Self::new(error, message)
        }
    }

    /// The stream has no changesets
    pub fn stream_not_found(stream_id: &str) -> Self {
        Self::for_stream(
            stream_id,
            ErrorCode::StreamNotFound,
            format!("The specified stream({stream_id}) doesn't exist"),
        )
    }

    /// The caller's expectation is outdated; lists what was committed since
    pub fn concurrency_exception(stream_id: &str, expectation: impl fmt::Display, forthcoming: Vec<ChangesetBody>) -> Self {
        Self {
            forthcoming_changesets: Some(forthcoming),
            ..Self::for_stream(
                stream_id,
                ErrorCode::OptimisticConcurrencyException,
                format!(
                    "The expected {expectation} is outdated, review the changeset(s) appended after it."
                ),
            )
        }
    }

    /// Map a core error that escaped a handler
    pub fn from_error(stream_id: Option<&str>, err: &EventStoreError) -> Self {
        let code = match err {
            EventStoreError::ConcurrencyConflict { .. } => ErrorCode::OptimisticConcurrencyException,
            EventStoreError::Validation(_) => ErrorCode::InvalidRequest,
            EventStoreError::NotFound(_) => ErrorCode::StreamNotFound,
            EventStoreError::StoreUnavailable(_)
            | EventStoreError::CounterContended { .. }
            | EventStoreError::Inconsistent(_) => {
                ErrorCode::InternalError
            }
        };
        Self {
            stream_id: stream_id.map(str::to_string),
            ..Self::new(code, err.to_string())
        }
    }

    /// HTTP-style status
    pub fn status(&self) -> u16 {
        self.error.status()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

/// Successful commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommitResponse {
    /// Stream committed to
    pub stream_id: String,
    /// Id of the new changeset
    pub changeset_id: u64,
}

/// A changeset as returned by stream reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChangesetBody {
    /// Changeset id
    pub changeset_id: u64,
    /// Event payloads
    pub events: Vec<Value>,
    /// Changeset metadata
    pub metadata: Value,
}

impl From<Changeset> for ChangesetBody {
    fn from(changeset: Changeset) -> Self {
        Self {
            changeset_id: changeset.changeset_id,
            events: changeset.events,
            metadata: changeset.metadata,
        }
    }
}

/// Changesets of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StreamChangesetsResponse {
    /// Stream read from
    pub stream_id: String,
    /// Changesets, ascending by id
    pub changesets: Vec<ChangesetBody>,
}

/// Events of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StreamEventsResponse {
    /// Stream read from
    pub stream_id: String,
    /// Events, ascending by id
    pub events: Vec<NumberedEvent>,
}

/// A changeset in the global ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GlobalChangeset {
    /// Stream the changeset belongs to
    pub stream_id: String,
    /// Changeset id
    pub changeset_id: u64,
    /// Event payloads
    pub events: Vec<Value>,
    /// Changeset metadata
    pub metadata: Value,
    /// Checkpoint of the changeset's global position
    pub checkpoint: Checkpoint,
}

/// One page of the global ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GlobalChangesetsResponse {
    /// Checkpoint the read started from
    pub checkpoint: Checkpoint,
    /// Limit applied
    pub limit: usize,
    /// Changesets, ascending by checkpoint
    pub changesets: Vec<GlobalChangeset>,
    /// Checkpoint to continue from
    pub next_checkpoint: Checkpoint,
}

/// Projected store statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StatsResponse {
    /// Streams with at least one changeset
    pub total_streams: u64,
    /// Changesets across all streams
    pub total_changesets: u64,
    /// Events across all streams
    pub total_events: u64,
    /// Changesets in the longest stream
    pub max_stream_length: u64,
    /// Checkpoint the statistics are current up to
    pub statistics_version: Checkpoint,
}

/// Crate version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VersionResponse {
    /// Semantic version
    pub version: String,
}
