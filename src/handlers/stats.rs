// Copyright 2025 Cowboy AI, LLC.

//! Statistics reads

use crate::handlers::analysis_projector::load_analysis_state;
use crate::handlers::{Handler, HandlerResult};
use crate::infrastructure::key_range_store::KeyRangeStore;
use crate::responses::{ErrorCode, ErrorResponse, StatsResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// Ask for the projected statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats;

/// Returns the latest projected statistics
#[derive(Clone)]
pub struct StatsHandler {
    store: Arc<dyn KeyRangeStore>,
}

impl StatsHandler {
    /// Create the handler
    pub fn new(store: Arc<dyn KeyRangeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler<FetchStats> for StatsHandler {
    type Response = StatsResponse;

    async fn handle(&self, _query: FetchStats) -> HandlerResult<StatsResponse> {
        let state = load_analysis_state(self.store.as_ref())
            .await
            .map_err(|e| ErrorResponse::from_error(None, &e))?
            .ok_or_else(|| {
                ErrorResponse::new(
                    ErrorCode::StatisticsNotReady,
                    "Statistics are not yet generated",
                )
            })?;
        Ok(StatsResponse {
            total_streams: state.total_streams,
            total_changesets: state.total_changesets,
            total_events: state.total_events,
            max_stream_length: state.max_stream_length,
            statistics_version: state.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectorConfig;
    use crate::handlers::AnalysisProjector;
    use crate::infrastructure::in_memory_store::InMemoryKeyRangeStore;

    #[tokio::test]
    async fn test_not_ready_until_projected() {
        let store = Arc::new(InMemoryKeyRangeStore::new());
        let handler = StatsHandler::new(store.clone());

        let err = handler.handle(FetchStats).await.unwrap_err();
        assert_eq!(err.error, ErrorCode::StatisticsNotReady);
        assert_eq!(err.status(), 404);

        AnalysisProjector::new(store, ProjectorConfig::default())
            .execute()
            .await
            .unwrap();
        let stats = handler.handle(FetchStats).await.unwrap();
        assert_eq!(stats.total_streams, 0);
        assert_eq!(stats.statistics_version, 0);
    }
}
