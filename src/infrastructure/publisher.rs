// Copyright 2025 Cowboy AI, LLC.

//! Fan-out of committed changesets to downstream topics
//!
//! Each changeset is published once to the changesets topic and once per
//! event to the events topic. Messages of one stream share a message group
//! (the hex SHA-224 of the stream id), so FIFO topics keep per-stream order.

use crate::changeset::Changeset;
use async_nats::jetstream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha224};
use thiserror::Error;
use tracing::{debug, info};

/// Errors publishing to a topic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The message could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The topic rejected or lost the message
    #[error("Publish failed: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialization(err.to_string())
    }
}

/// A destination for published messages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Topic: Send + Sync {
    /// Publish one message within an ordering group
    async fn publish(&self, message: String, group: String) -> Result<(), PublishError>;
}

/// Message sent to the changesets topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesetMessage {
    /// Stream the changeset belongs to
    pub stream_id: String,
    /// Changeset id
    pub changeset_id: u64,
    /// Event payloads
    pub events: Vec<Value>,
    /// Changeset metadata
    pub metadata: Value,
}

/// Message sent to the events topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Stream the event belongs to
    pub stream_id: String,
    /// Changeset holding the event
    pub changeset_id: u64,
    /// Event id within the stream
    pub event_id: u64,
    /// Event payload
    pub data: Value,
}

/// Ordering group of a stream
pub fn message_group(stream_id: &str) -> String {
    hex::encode(Sha224::digest(stream_id.as_bytes()))
}

/// Publishes changesets and their events
pub struct Publisher {
    changesets_topic: Box<dyn Topic>,
    events_topic: Box<dyn Topic>,
}

impl Publisher {
    /// Create a publisher over the two topics
    pub fn new(changesets_topic: Box<dyn Topic>, events_topic: Box<dyn Topic>) -> Self {
        Self {
            changesets_topic,
            events_topic,
        }
    }

    /// Publish changesets in the given order
    pub async fn publish(&self, changesets: &[Changeset]) -> Result<(), PublishError> {
        info!(count = changesets.len(), "Publishing changesets");
        for changeset in changesets {
            let group = message_group(&changeset.stream_id);

            let message = serde_json::to_string(&ChangesetMessage {
                stream_id: changeset.stream_id.clone(),
                changeset_id: changeset.changeset_id,
                events: changeset.events.clone(),
                metadata: changeset.metadata.clone(),
            })?;
            debug!(%message, "Publishing to changesets topic");
            self.changesets_topic.publish(message, group.clone()).await?;

            for event in changeset.numbered_events() {
                let message = serde_json::to_string(&EventMessage {
                    stream_id: changeset.stream_id.clone(),
                    changeset_id: changeset.changeset_id,
                    event_id: event.id,
                    data: event.data,
                })?;
                debug!(%message, "Publishing to events topic");
                self.events_topic.publish(message, group.clone()).await?;
            }
        }
        Ok(())
    }
}

/// [`Topic`] backed by a JetStream subject
///
/// The group travels in the `Nats-Msg-Group` header; JetStream keeps the
/// subject's order, which covers the per-stream ordering.
pub struct JetStreamTopic {
    context: jetstream::Context,
    subject: String,
}

impl JetStreamTopic {
    /// Publish to `subject` through `context`
    pub fn new(context: jetstream::Context, subject: impl Into<String>) -> Self {
        Self {
            context,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl Topic for JetStreamTopic {
    async fn publish(&self, message: String, group: String) -> Result<(), PublishError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Group", group.as_str());
        self.context
            .publish_with_headers(self.subject.clone(), headers, message.into())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(())
    }
}
