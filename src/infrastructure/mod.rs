// Copyright 2025 Cowboy AI, LLC.

//! Infrastructure layer for cim-event-store
//!
//! This module contains the storage and indexing engine:
//! - The abstract key-range store and its in-memory and JetStream backends
//! - Per-stream changeset access
//! - The global counter and global index assignment
//! - Paginated reads over the global ordering
//! - Publishing committed changesets to downstream topics

/// Singleton counter row of the global index
pub mod global_counter;
pub mod global_indexer;
pub mod global_reader;
pub mod in_memory_store;
pub mod jetstream_store;
pub mod key_range_store;
/// Fan-out of committed changesets
pub mod publisher;
pub mod stream_store;

pub use global_counter::{GlobalCounter, GlobalCounterStore};
pub use global_indexer::GlobalIndexer;
pub use global_reader::GlobalReader;
pub use in_memory_store::InMemoryKeyRangeStore;
pub use jetstream_store::JetStreamKeyRangeStore;
pub use key_range_store::{
    analysis_key, counter_key, is_reserved_stream_id, ChangeFeed, ChangeKind, ChangeRecord,
    Condition, Direction, KeyCondition, KeyRangeStore, Patch, RangeQuery, Row, RowKey, StoreError,
    StreamIndex, ANALYSIS_STREAM_ID, COUNTER_STREAM_ID, RESERVED_PREFIX,
};
pub use publisher::{
    message_group, ChangesetMessage, EventMessage, JetStreamTopic, PublishError, Publisher, Topic,
};
pub use stream_store::StreamStore;
