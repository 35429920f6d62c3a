// Copyright 2025 Cowboy AI, LLC.

//! Changesets: the unit of atomicity of a stream
//!
//! A changeset is one committed batch of events. Within a stream, changeset
//! ids run 1, 2, 3, ... without gaps, and each changeset's event ids continue
//! exactly where its predecessor's stopped.

use crate::checkpoint::GlobalPosition;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identity of a changeset: the stream it belongs to and its id in that stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangesetKey {
    /// Stream (partition) id
    pub stream_id: String,
    /// Changeset id within the stream
    pub changeset_id: u64,
}

impl ChangesetKey {
    /// Create a key
    pub fn new(stream_id: impl Into<String>, changeset_id: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            changeset_id,
        }
    }
}

impl fmt::Display for ChangesetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream_id, self.changeset_id)
    }
}

/// One committed batch of events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// Stream the changeset was appended to
    pub stream_id: String,
    /// Position within the stream, starting at 1
    pub changeset_id: u64,
    /// Opaque metadata supplied by the committer
    pub metadata: Value,
    /// Opaque event payloads, in commit order
    pub events: Vec<Value>,
    /// Id of the first event in `events`
    pub first_event_id: u64,
    /// Id of the last event in `events`
    pub last_event_id: u64,
    /// When the changeset was created
    pub timestamp: DateTime<Utc>,
    /// Position in the global ordering, attached after the fact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_position: Option<GlobalPosition>,
}

/// An event together with its stream-level id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NumberedEvent {
    /// Event id within the stream
    pub id: u64,
    /// Opaque event payload
    pub data: Value,
}

impl Changeset {
    /// First changeset of a new stream
    pub fn initial(stream_id: impl Into<String>, events: Vec<Value>, metadata: Value) -> Self {
        let last_event_id = events.len() as u64;
        Self {
            stream_id: stream_id.into(),
            changeset_id: 1,
            metadata,
            events,
            first_event_id: 1,
            last_event_id,
            timestamp: Utc::now(),
            global_position: None,
        }
    }

    /// Changeset following `prev`; the caller guarantees `prev` is the stream's tail
    pub fn next(prev: &Changeset, events: Vec<Value>, metadata: Value) -> Self {
        let first_event_id = prev.last_event_id + 1;
        let last_event_id = prev.last_event_id + events.len() as u64;
        Self {
            stream_id: prev.stream_id.clone(),
            changeset_id: prev.changeset_id + 1,
            metadata,
            events,
            first_event_id,
            last_event_id,
            timestamp: Utc::now(),
            global_position: None,
        }
    }

    /// Key of this changeset
    pub fn key(&self) -> ChangesetKey {
        ChangesetKey::new(self.stream_id.clone(), self.changeset_id)
    }

    /// Whether the event id falls inside this changeset
    pub fn covers_event(&self, event_id: u64) -> bool {
        self.first_event_id <= event_id && event_id <= self.last_event_id
    }

    /// Events paired with their stream-level ids
    pub fn numbered_events(&self) -> impl Iterator<Item = NumberedEvent> + '_ {
        self.events
            .iter()
            .zip(self.first_event_id..)
            .map(|(data, id)| NumberedEvent {
                id,
                data: data.clone(),
            })
    }
}
