// Copyright 2025 Cowboy AI, LLC.

//! Changeset range reads

use crate::commands::FetchStreamChangesets;
use crate::handlers::{Handler, HandlerResult};
use crate::infrastructure::stream_store::StreamStore;
use crate::responses::{ChangesetBody, ErrorResponse, StreamChangesetsResponse};
use async_trait::async_trait;

/// Reads a stream's changesets by changeset id
#[derive(Clone)]
pub struct FetchChangesetsHandler {
    streams: StreamStore,
}

impl FetchChangesetsHandler {
    /// Create the handler
    pub fn new(streams: StreamStore) -> Self {
        Self { streams }
    }
}

#[async_trait]
impl Handler<FetchStreamChangesets> for FetchChangesetsHandler {
    type Response = StreamChangesetsResponse;

    async fn handle(&self, query: FetchStreamChangesets) -> HandlerResult<StreamChangesetsResponse> {
        let stream_id = query.stream_id();
        let on_error = |e| ErrorResponse::from_error(Some(stream_id), &e);

        let changesets = self
            .streams
            .fetch_by_changeset_range(stream_id, query.from(), query.to())
            .await
            .map_err(on_error)?;
        // Empty range or unknown stream
        if changesets.is_empty() && self.streams.fetch_last(stream_id).await.map_err(on_error)?.is_none() {
            return Err(ErrorResponse::stream_not_found(stream_id));
        }

        Ok(StreamChangesetsResponse {
            stream_id: stream_id.to_string(),
            changesets: changesets.into_iter().map(ChangesetBody::from).collect(),
        })
    }
}
