// Copyright 2025 Cowboy AI, LLC.

//! The event store wired together over one key-range store

use crate::commands::{
    Commit, FetchGlobalChangesets, FetchStreamChangesets, FetchStreamEvents, Version,
};
use crate::config::EventStoreConfig;
use crate::handlers::{
    AnalysisProjector, ChangeFeedProcessor, CommitHandler, FetchChangesetsHandler,
    FetchEventsHandler, FetchGlobalChangesetsHandler, FetchStats, Handler, HandlerResult,
    StatsHandler, VersionHandler,
};
use crate::infrastructure::{
    GlobalCounterStore, GlobalIndexer, GlobalReader, KeyRangeStore, Publisher, StreamStore,
};
use crate::responses::{
    CommitResponse, GlobalChangesetsResponse, StatsResponse, StreamChangesetsResponse,
    StreamEventsResponse, VersionResponse,
};
use std::sync::Arc;

/// Service exposing every event store operation
pub struct EventStoreService {
    store: Arc<dyn KeyRangeStore>,
    config: EventStoreConfig,
    commit: CommitHandler,
    changesets: FetchChangesetsHandler,
    events: FetchEventsHandler,
    global_changesets: FetchGlobalChangesetsHandler,
    stats: StatsHandler,
}

impl EventStoreService {
    /// Create a service over `store`
    pub fn new(store: Arc<dyn KeyRangeStore>, config: EventStoreConfig) -> Self {
        let streams = StreamStore::new(store.clone());
        Self {
            commit: CommitHandler::new(streams.clone(), config.commit.clone()),
            changesets: FetchChangesetsHandler::new(streams.clone()),
            events: FetchEventsHandler::new(streams),
            global_changesets: FetchGlobalChangesetsHandler::new(GlobalReader::new(store.clone())),
            stats: StatsHandler::new(store.clone()),
            store,
            config,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Append a changeset
    pub async fn commit(&self, command: Commit) -> HandlerResult<CommitResponse> {
        self.commit.handle(command).await
    }

    /// Read changesets of a stream
    pub async fn fetch_changesets(
        &self,
        query: FetchStreamChangesets,
    ) -> HandlerResult<StreamChangesetsResponse> {
        self.changesets.handle(query).await
    }

    /// Read events of a stream
    pub async fn fetch_events(&self, query: FetchStreamEvents) -> HandlerResult<StreamEventsResponse> {
        self.events.handle(query).await
    }

    /// Page through the global ordering
    pub async fn fetch_global_changesets(
        &self,
        query: FetchGlobalChangesets,
    ) -> HandlerResult<GlobalChangesetsResponse> {
        self.global_changesets.handle(query).await
    }

    /// Latest projected statistics
    pub async fn stats(&self) -> HandlerResult<StatsResponse> {
        self.stats.handle(FetchStats).await
    }

    /// Crate version
    pub async fn version(&self) -> HandlerResult<VersionResponse> {
        VersionHandler.handle(Version).await
    }

    /// Global index assigner sharing this service's store
    pub fn indexer(&self) -> GlobalIndexer {
        GlobalIndexer::new(
            StreamStore::new(self.store.clone()),
            GlobalCounterStore::new(self.store.clone()),
            self.config.indexer.clone(),
        )
    }

    /// Statistics projector sharing this service's store
    pub fn projector(&self) -> AnalysisProjector {
        AnalysisProjector::new(self.store.clone(), self.config.projector.clone())
    }

    /// Change-feed consumer that indexes and then publishes through `publisher`
    pub fn change_feed_processor(&self, publisher: Publisher) -> ChangeFeedProcessor {
        ChangeFeedProcessor::new(self.indexer(), publisher)
    }
}
