// Copyright 2025 Cowboy AI, LLC.

//! Global changeset reads

use crate::commands::FetchGlobalChangesets;
use crate::handlers::{Handler, HandlerResult};
use crate::infrastructure::global_reader::GlobalReader;
use crate::responses::{ErrorResponse, GlobalChangeset, GlobalChangesetsResponse};
use async_trait::async_trait;

/// Pages through the global ordering
#[derive(Clone)]
pub struct FetchGlobalChangesetsHandler {
    reader: GlobalReader,
}

impl FetchGlobalChangesetsHandler {
    /// Create the handler
    pub fn new(reader: GlobalReader) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl Handler<FetchGlobalChangesets> for FetchGlobalChangesetsHandler {
    type Response = GlobalChangesetsResponse;

    async fn handle(&self, query: FetchGlobalChangesets) -> HandlerResult<GlobalChangesetsResponse> {
        let checkpoint = query.checkpoint();
        let changesets: Vec<GlobalChangeset> = self
            .reader
            .fetch_global_changesets(checkpoint, query.limit())
            .await
            .map_err(|e| ErrorResponse::from_error(None, &e))?
            .into_iter()
            .filter_map(|changeset| {
                let checkpoint = changeset.global_position?.to_checkpoint();
                Some(GlobalChangeset {
                    stream_id: changeset.stream_id,
                    changeset_id: changeset.changeset_id,
                    events: changeset.events,
                    metadata: changeset.metadata,
                    checkpoint,
                })
            })
            .collect();

        let next_checkpoint = changesets
            .iter()
            .map(|changeset| changeset.checkpoint + 1)
            .max()
            .unwrap_or(checkpoint);

        Ok(GlobalChangesetsResponse {
            checkpoint,
            limit: query.limit(),
            changesets,
            next_checkpoint,
        })
    }
}
