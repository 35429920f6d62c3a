// Copyright 2025 Cowboy AI, LLC.

//! Commands accepted by the request handlers
//!
//! Every command is validated when it is built, either from typed values
//! (`new`) or from the raw strings of a request (`parse`). Handlers only ever
//! see valid commands, so validation failures never touch the store.

use crate::config::ReaderConfig;
use crate::checkpoint::Checkpoint;
use crate::infrastructure::key_range_store::is_reserved_stream_id;
use crate::responses::{ErrorCode, ErrorResponse};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

fn stream_id(raw: Option<&str>) -> Result<String, ErrorResponse> {
    let stream_id = raw.map(str::trim).unwrap_or_default();
    if stream_id.is_empty() {
        return Err(ErrorResponse::new(
            ErrorCode::MissingStreamId,
            "stream_id is a required value",
        ));
    }
    if is_reserved_stream_id(stream_id) {
        return Err(ErrorResponse::for_stream(
            stream_id,
            ErrorCode::ReservedStreamId,
            format!("Stream ids starting with '$' are reserved: {stream_id}"),
        ));
    }
    Ok(stream_id.to_string())
}

/// Parse an optional integer parameter, rejecting anything below `min`
fn integer(raw: Option<&str>, min: i64) -> Result<Option<u64>, ()> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => match value.parse::<i64>() {
            Ok(n) if n >= min => Ok(Some(n as u64)),
            _ => Err(()),
        },
    }
}

/// The caller's view of the stream tail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// The stream must not exist yet
    NewStream,
    /// The last changeset must have this id
    LastChangeset(u64),
    /// The last changeset must end with this event id
    LastEvent(u64),
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::NewStream => write!(f, "new stream"),
            Expectation::LastChangeset(id) => write!(f, "last changeset ({id})"),
            Expectation::LastEvent(id) => write!(f, "last event ({id})"),
        }
    }
}

#[derive(Deserialize)]
struct CommitBody {
    #[serde(default)]
    events: Option<Vec<Value>>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// Append a changeset to a stream
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    stream_id: String,
    expectation: Expectation,
    events: Vec<Value>,
    metadata: Value,
}

impl Commit {
    /// Build a validated commit
    pub fn new(
        stream_id: impl Into<String>,
        expectation: Expectation,
        events: Vec<Value>,
        metadata: Value,
    ) -> Result<Self, ErrorResponse> {
        let stream_id: String = stream_id.into();
        let stream_id = self::stream_id(Some(stream_id.as_str()))?;
        if events.is_empty() {
            return Err(ErrorResponse::for_stream(
                stream_id,
                ErrorCode::MissingEvents,
                "A commit needs at least one event",
            ));
        }
        // An expectation of 0 means the stream is expected to be new
        let expectation = match expectation {
            Expectation::LastChangeset(0) | Expectation::LastEvent(0) => Expectation::NewStream,
            other => other,
        };
        Ok(Self {
            stream_id,
            expectation,
            events,
            metadata,
        })
    }

    /// Build a commit from request parameters and a JSON body `{events, metadata}`
    pub fn parse(
        stream_id: Option<&str>,
        expected_last_changeset: Option<&str>,
        expected_last_event: Option<&str>,
        body: &str,
    ) -> Result<Self, ErrorResponse> {
        let stream_id = self::stream_id(stream_id)?;

        let changeset = integer(expected_last_changeset, 0).map_err(|()| {
            ErrorResponse::for_stream(
                &stream_id,
                ErrorCode::InvalidExpectedChangesetId,
                format!(
                    "The specified expected changeset id(\"{}\") is invalid. Expected a positive integer.",
                    expected_last_changeset.unwrap_or_default()
                ),
            )
        })?;
        let event = integer(expected_last_event, 0).map_err(|()| {
            ErrorResponse::for_stream(
                &stream_id,
                ErrorCode::InvalidExpectedEventId,
                format!(
                    "The specified expected event id(\"{}\") is invalid. Expected a positive integer.",
                    expected_last_event.unwrap_or_default()
                ),
            )
        })?;

        let expectation = match (changeset.unwrap_or(0), event.unwrap_or(0)) {
            (0, 0) => Expectation::NewStream,
            (id, 0) if event.is_none() => Expectation::LastChangeset(id),
            (0, id) if changeset.is_none() => Expectation::LastEvent(id),
            _ => {
                return Err(ErrorResponse::for_stream(
                    &stream_id,
                    ErrorCode::AmbiguousExpectation,
                    "Only one of expected_last_changeset and expected_last_event can be specified",
                ))
            }
        };

        let body: CommitBody = serde_json::from_str(body).map_err(|e| {
            ErrorResponse::for_stream(
                &stream_id,
                ErrorCode::InvalidRequest,
                format!("The request body is not a valid commit: {e}"),
            )
        })?;
        Self::new(
            stream_id,
            expectation,
            body.events.unwrap_or_default(),
            body.metadata.unwrap_or_else(|| Value::Object(Default::default())),
        )
    }

    /// Target stream
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Expected stream tail
    pub fn expectation(&self) -> Expectation {
        self.expectation
    }

    /// Event payloads
    pub fn events(&self) -> &[Value] {
        &self.events
    }

    /// Changeset metadata
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Split into owned parts
    pub fn into_parts(self) -> (String, Expectation, Vec<Value>, Value) {
        (self.stream_id, self.expectation, self.events, self.metadata)
    }
}

/// Validate an inclusive `[from, to]` filter of positive ids
fn range(
    stream_id: &str,
    from: Option<u64>,
    to: Option<u64>,
    code: ErrorCode,
) -> Result<(Option<u64>, Option<u64>), ErrorResponse> {
    if from == Some(0) || to == Some(0) {
        return Err(ErrorResponse::for_stream(
            stream_id,
            code,
            "The filtering params(from, to) have to be positive integer values",
        ));
    }
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ErrorResponse::for_stream(
                stream_id,
                code,
                format!(
                    "The higher boundary cannot be lower than the lower boundary: {from}(from) > {to}(to)"
                ),
            ));
        }
    }
    Ok((from, to))
}

fn parse_range(
    stream_id: &str,
    from: Option<&str>,
    to: Option<&str>,
    code: ErrorCode,
) -> Result<(Option<u64>, Option<u64>), ErrorResponse> {
    let invalid = |()| {
        ErrorResponse::for_stream(
            stream_id,
            code,
            "The filtering params(from, to) have to be positive integer values",
        )
    };
    let from = integer(from, 1).map_err(invalid)?;
    let to = integer(to, 1).map_err(invalid)?;
    range(stream_id, from, to, code)
}

/// Read a stream's changesets by changeset id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchStreamChangesets {
    stream_id: String,
    from: Option<u64>,
    to: Option<u64>,
}

impl FetchStreamChangesets {
    /// Build a validated query
    pub fn new(
        stream_id: impl Into<String>,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<Self, ErrorResponse> {
        let stream_id: String = stream_id.into();
        let stream_id = self::stream_id(Some(stream_id.as_str()))?;
        let (from, to) = range(&stream_id, from, to, ErrorCode::InvalidChangesetFilteringParams)?;
        Ok(Self { stream_id, from, to })
    }

    /// Build a query from request parameters
    pub fn parse(stream_id: Option<&str>, from: Option<&str>, to: Option<&str>) -> Result<Self, ErrorResponse> {
        let stream_id = self::stream_id(stream_id)?;
        let (from, to) = parse_range(&stream_id, from, to, ErrorCode::InvalidChangesetFilteringParams)?;
        Ok(Self { stream_id, from, to })
    }

    /// Stream to read
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Lowest changeset id, inclusive
    pub fn from(&self) -> Option<u64> {
        self.from
    }

    /// Highest changeset id, inclusive
    pub fn to(&self) -> Option<u64> {
        self.to
    }
}

/// Read a stream's events by event id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchStreamEvents {
    stream_id: String,
    from: Option<u64>,
    to: Option<u64>,
}

impl FetchStreamEvents {
    /// Build a validated query
    pub fn new(
        stream_id: impl Into<String>,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<Self, ErrorResponse> {
        let stream_id: String = stream_id.into();
        let stream_id = self::stream_id(Some(stream_id.as_str()))?;
        let (from, to) = range(&stream_id, from, to, ErrorCode::InvalidEventFilteringParams)?;
        Ok(Self { stream_id, from, to })
    }

    /// Build a query from request parameters
    pub fn parse(stream_id: Option<&str>, from: Option<&str>, to: Option<&str>) -> Result<Self, ErrorResponse> {
        let stream_id = self::stream_id(stream_id)?;
        let (from, to) = parse_range(&stream_id, from, to, ErrorCode::InvalidEventFilteringParams)?;
        Ok(Self { stream_id, from, to })
    }

    /// Stream to read
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Lowest event id, inclusive
    pub fn from(&self) -> Option<u64> {
        self.from
    }

    /// Highest event id, inclusive
    pub fn to(&self) -> Option<u64> {
        self.to
    }
}

/// Read the global ordering from a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchGlobalChangesets {
    checkpoint: Checkpoint,
    limit: usize,
}

impl FetchGlobalChangesets {
    /// Build a validated query; a missing limit falls back to the configured default
    pub fn new(checkpoint: Checkpoint, limit: Option<usize>, config: &ReaderConfig) -> Result<Self, ErrorResponse> {
        let limit = limit.unwrap_or(config.default_limit);
        if limit == 0 || limit > config.max_limit {
            return Err(ErrorResponse::new(
                ErrorCode::InvalidLimit,
                format!("The limit has to be an integer between 1 and {}", config.max_limit),
            ));
        }
        Ok(Self { checkpoint, limit })
    }

    /// Build a query from request parameters
    pub fn parse(checkpoint: Option<&str>, limit: Option<&str>, config: &ReaderConfig) -> Result<Self, ErrorResponse> {
        let checkpoint = integer(checkpoint, 0).map_err(|()| {
            ErrorResponse::new(
                ErrorCode::InvalidCheckpoint,
                "The checkpoint has to be a non-negative integer",
            )
        })?;
        let limit = integer(limit, 1).map_err(|()| {
            ErrorResponse::new(
                ErrorCode::InvalidLimit,
                format!("The limit has to be an integer between 1 and {}", config.max_limit),
            )
        })?;
        Self::new(checkpoint.unwrap_or(0), limit.map(|l| l as usize), config)
    }

    /// First checkpoint to read
    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    /// Most changesets to return
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Ask for the crate version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;
