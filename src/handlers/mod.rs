// Copyright 2025 Cowboy AI, LLC.

//! Request handlers
//!
//! Thin wrappers that turn validated [`crate::commands`] into store calls and
//! [`crate::responses`] bodies, plus the background work driven by the change
//! feed (global indexing, publishing, analysis projection).

pub mod analysis_projector;
pub mod change_feed;
pub mod changesets;
pub mod commit;
pub mod events;
pub mod global_changesets;
pub mod stats;
pub mod version;

pub use analysis_projector::AnalysisProjector;
pub use change_feed::ChangeFeedProcessor;
pub use changesets::FetchChangesetsHandler;
pub use commit::CommitHandler;
pub use events::FetchEventsHandler;
pub use global_changesets::FetchGlobalChangesetsHandler;
pub use stats::{FetchStats, StatsHandler};
pub use version::VersionHandler;

use crate::responses::ErrorResponse;
use async_trait::async_trait;

/// Result of handling a request
pub type HandlerResult<T> = Result<T, ErrorResponse>;

/// Handles one kind of request
#[async_trait]
pub trait Handler<C: Send + 'static>: Send + Sync {
    /// Response body on success
    type Response;

    /// Handle the request
    async fn handle(&self, command: C) -> HandlerResult<Self::Response>;
}
