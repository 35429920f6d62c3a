// Copyright 2025 Cowboy AI, LLC.

//! Event range reads
//!
//! Changesets at the edges of the range may hold events outside it; those
//! events are trimmed so the response holds exactly `[from, to]`.

use crate::commands::FetchStreamEvents;
use crate::handlers::{Handler, HandlerResult};
use crate::infrastructure::stream_store::StreamStore;
use crate::responses::{ErrorResponse, StreamEventsResponse};
use async_trait::async_trait;

/// Reads a stream's events by event id
#[derive(Clone)]
pub struct FetchEventsHandler {
    streams: StreamStore,
}

impl FetchEventsHandler {
    /// Create the handler
    pub fn new(streams: StreamStore) -> Self {
        Self { streams }
    }
}

#[async_trait]
impl Handler<FetchStreamEvents> for FetchEventsHandler {
    type Response = StreamEventsResponse;

    async fn handle(&self, query: FetchStreamEvents) -> HandlerResult<StreamEventsResponse> {
        let stream_id = query.stream_id();
        let on_error = |e| ErrorResponse::from_error(Some(stream_id), &e);

        let changesets = self
            .streams
            .fetch_by_event_range(stream_id, query.from(), query.to())
            .await
            .map_err(on_error)?;
        let from = query.from().unwrap_or(1);
        let to = query.to().unwrap_or(u64::MAX);
        let events: Vec<_> = changesets
            .iter()
            .flat_map(|changeset| changeset.numbered_events())
            .filter(|event| from <= event.id && event.id <= to)
            .collect();

        if events.is_empty() && self.streams.fetch_last(stream_id).await.map_err(on_error)?.is_none() {
            return Err(ErrorResponse::stream_not_found(stream_id));
        }

        Ok(StreamEventsResponse {
            stream_id: stream_id.to_string(),
            events,
        })
    }
}
