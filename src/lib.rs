// Copyright 2025 Cowboy AI, LLC.

//! # CIM Event Store
//!
//! Changeset-based event store for the Composable Information Machine.
//!
//! Streams are append-only logs of changesets (batches of events) guarded by
//! optimistic concurrency. On top of the per-stream logs the store maintains
//! a global ordering across all streams, assigned asynchronously from the
//! store's change feed, which consumers page through with integer
//! checkpoints.
//!
//! ## Layout
//!
//! - [`changeset`] / [`checkpoint`]: the data model and the position codec
//! - [`infrastructure`]: the key-range store abstraction, its backends, and
//!   the stream store, global counter, global indexer and global reader
//! - [`commands`] / [`responses`] / [`handlers`]: validated requests, response
//!   bodies and the handlers connecting them to the store
//! - [`service`]: everything wired together over one store
//!
//! ## Concurrency
//!
//! All mutual exclusion is delegated to conditional writes on the store. Two
//! writers racing for the same changeset slot get exactly one winner; two
//! indexers racing on the global counter serialize through compare-and-swap.
//! There are no in-process locks on the write path.

#![warn(missing_docs)]

pub mod changeset;
pub mod checkpoint;
pub mod commands;
pub mod config;
mod errors;
pub mod handlers;
pub mod infrastructure;
pub mod responses;
pub mod service;
pub mod statistics;

pub use changeset::{Changeset, ChangesetKey, NumberedEvent};
pub use checkpoint::{next_position, to_checkpoint, to_position, Checkpoint, GlobalPosition, PAGE_SIZE};
pub use commands::{
    Commit, Expectation, FetchGlobalChangesets, FetchStreamChangesets, FetchStreamEvents, Version,
};
pub use config::{
    CommitConfig, ConfigError, EventStoreConfig, IndexerConfig, JetStreamStoreConfig,
    ProjectorConfig, ReaderConfig,
};
pub use errors::{EventStoreError, EventStoreResult};
pub use handlers::{Handler, HandlerResult};
pub use responses::{
    ChangesetBody, CommitResponse, ErrorCode, ErrorResponse, GlobalChangeset,
    GlobalChangesetsResponse, StatsResponse, StreamChangesetsResponse, StreamEventsResponse,
    VersionResponse,
};
pub use service::EventStoreService;
pub use statistics::AnalysisState;
