// Copyright 2025 Cowboy AI, LLC.

//! Commit handler
//!
//! Builds the next changeset from the caller's expectation of the stream
//! tail and appends it. Any mismatch, whether detected up front or by the
//! conditional insert, is answered with the changesets the caller missed.

use crate::changeset::Changeset;
use crate::commands::{Commit, Expectation};
use crate::config::CommitConfig;
use crate::errors::EventStoreError;
use crate::handlers::{Handler, HandlerResult};
use crate::infrastructure::stream_store::StreamStore;
use crate::responses::{ChangesetBody, CommitResponse, ErrorResponse};
use async_trait::async_trait;
use tracing::{debug, info};

/// Appends changesets under optimistic concurrency
#[derive(Clone)]
pub struct CommitHandler {
    streams: StreamStore,
    config: CommitConfig,
}

impl CommitHandler {
    /// Create a commit handler
    pub fn new(streams: StreamStore, config: CommitConfig) -> Self {
        Self { streams, config }
    }

    async fn conflict(&self, stream_id: &str, expectation: Expectation) -> ErrorResponse {
        let limit = self.config.forthcoming_limit;
        let forthcoming = match expectation {
            Expectation::NewStream => self.streams.fetch_changesets_after(stream_id, 1, limit).await,
            Expectation::LastChangeset(id) => {
                self.streams
                    .fetch_changesets_after(stream_id, id.saturating_add(1), limit)
                    .await
            }
            Expectation::LastEvent(id) => {
                self.streams
                    .fetch_events_after(stream_id, id.saturating_add(1), limit)
                    .await
            }
        };
        match forthcoming {
            Ok(changesets) => ErrorResponse::concurrency_exception(
                stream_id,
                expectation,
                changesets.into_iter().map(ChangesetBody::from).collect(),
            ),
            Err(e) => ErrorResponse::from_error(Some(stream_id), &e),
        }
    }

    /// Next changeset if the stream tail matches the expectation
    async fn prepare(&self, commit: Commit) -> Result<Option<Changeset>, EventStoreError> {
        let (stream_id, expectation, events, metadata) = commit.into_parts();
        if expectation == Expectation::NewStream {
            return Ok(Some(Changeset::initial(stream_id, events, metadata)));
        }

        let Some(prev) = self.streams.fetch_last(&stream_id).await? else {
            debug!(stream_id = %stream_id, %expectation, "Expectation against an unknown stream");
            return Ok(None);
        };
        let matches = match expectation {
            Expectation::LastChangeset(id) => prev.changeset_id == id,
            Expectation::LastEvent(id) => prev.last_event_id == id,
            Expectation::NewStream => false,
        };
        Ok(matches.then(|| Changeset::next(&prev, events, metadata)))
    }
}

#[async_trait]
impl Handler<Commit> for CommitHandler {
    type Response = CommitResponse;

    async fn handle(&self, commit: Commit) -> HandlerResult<CommitResponse> {
        let stream_id = commit.stream_id().to_string();
        let expectation = commit.expectation();
        debug!(stream_id = %stream_id, %expectation, "Commit");

        let changeset = match self.prepare(commit).await {
            Ok(Some(changeset)) => changeset,
            Ok(None) => return Err(self.conflict(&stream_id, expectation).await),
            Err(e) => return Err(ErrorResponse::from_error(Some(&stream_id), &e)),
        };

        let changeset_id = changeset.changeset_id;
        match self.streams.append(changeset).await {
            Ok(()) => {
                info!(stream_id = %stream_id, changeset_id, "Committed changeset");
                Ok(CommitResponse {
                    stream_id,
                    changeset_id,
                })
            }
            Err(e) if e.is_concurrency_conflict() => Err(self.conflict(&stream_id, expectation).await),
            Err(e) => Err(ErrorResponse::from_error(Some(&stream_id), &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory_store::InMemoryKeyRangeStore;
    use crate::responses::ErrorCode;
    use serde_json::json;
    use std::sync::Arc;

    fn handler() -> CommitHandler {
        CommitHandler::new(
            StreamStore::new(Arc::new(InMemoryKeyRangeStore::new())),
            CommitConfig::default(),
        )
    }

    fn commit(expectation: Expectation, events: usize) -> Commit {
        let events = (0..events).map(|i| json!({ "n": i })).collect();
        Commit::new("s", expectation, events, json!({})).unwrap()
    }

    #[tokio::test]
    async fn test_expectation_at_id_ceiling_is_a_plain_conflict() {
        let handler = handler();
        handler.handle(commit(Expectation::NewStream, 2)).await.unwrap();

        for expectation in [Expectation::LastChangeset(u64::MAX), Expectation::LastEvent(u64::MAX)] {
            let err = handler.handle(commit(expectation, 1)).await.unwrap_err();
            assert_eq!(err.error, ErrorCode::OptimisticConcurrencyException);
            assert_eq!(err.forthcoming_changesets.unwrap().len(), 0);
        }
    }

    #[tokio::test]
    async fn test_commit_by_event_expectation() {
        let handler = handler();
        handler.handle(commit(Expectation::NewStream, 3)).await.unwrap();

        let response = handler
            .handle(commit(Expectation::LastEvent(3), 1))
            .await
            .unwrap();
        assert_eq!(response.changeset_id, 2);

        let err = handler
            .handle(commit(Expectation::LastEvent(3), 1))
            .await
            .unwrap_err();
        assert_eq!(err.error, ErrorCode::OptimisticConcurrencyException);
        let forthcoming = err.forthcoming_changesets.unwrap();
        assert_eq!(forthcoming.len(), 1);
        assert_eq!(forthcoming[0].changeset_id, 2);
    }

    #[tokio::test]
    async fn test_second_initial_commit_conflicts() {
        let handler = handler();
        handler.handle(commit(Expectation::NewStream, 1)).await.unwrap();

        let err = handler.handle(commit(Expectation::NewStream, 1)).await.unwrap_err();
        assert_eq!(err.status(), 409);
        assert_eq!(err.forthcoming_changesets.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expectation_against_unknown_stream() {
        let err = handler()
            .handle(commit(Expectation::LastChangeset(4), 1))
            .await
            .unwrap_err();
        assert_eq!(err.error, ErrorCode::OptimisticConcurrencyException);
        assert_eq!(err.forthcoming_changesets, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_forthcoming_changesets_are_capped() {
        let store = Arc::new(InMemoryKeyRangeStore::new());
        let handler = CommitHandler::new(
            StreamStore::new(store),
            CommitConfig {
                forthcoming_limit: 2,
            },
        );
        handler.handle(commit(Expectation::NewStream, 1)).await.unwrap();
        for id in 1..=4 {
            handler
                .handle(commit(Expectation::LastChangeset(id), 1))
                .await
                .unwrap();
        }

        let err = handler
            .handle(commit(Expectation::LastChangeset(1), 1))
            .await
            .unwrap_err();
        let ids: Vec<u64> = err
            .forthcoming_changesets
            .unwrap()
            .iter()
            .map(|c| c.changeset_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_store_outage() {
        let store = InMemoryKeyRangeStore::new();
        store.set_unavailable(true).await;
        let handler = CommitHandler::new(StreamStore::new(Arc::new(store)), CommitConfig::default());

        let err = handler.handle(commit(Expectation::NewStream, 1)).await.unwrap_err();
        assert_eq!(err.error, ErrorCode::InternalError);
    }
}
