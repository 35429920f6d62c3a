// Copyright 2025 Cowboy AI, LLC.

//! Runtime configuration
//!
//! All sections default sensibly and can be loaded from JSON with any subset
//! of fields present. The global page size is not configurable, see
//! [`crate::checkpoint::PAGE_SIZE`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be parsed
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// Complete event store configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// Global index assignment
    pub indexer: IndexerConfig,
    /// Read handlers
    pub reader: ReaderConfig,
    /// Commit handler
    pub commit: CommitConfig,
    /// Analysis projection
    pub projector: ProjectorConfig,
    /// JetStream backend
    pub jetstream: JetStreamStoreConfig,
}

impl EventStoreConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.indexer.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "indexer.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.indexer.initial_backoff_ms > self.indexer.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "indexer.initial_backoff_ms exceeds indexer.max_backoff_ms".to_string(),
            ));
        }
        if self.reader.default_limit == 0 || self.reader.default_limit > self.reader.max_limit {
            return Err(ConfigError::Invalid(format!(
                "reader.default_limit must be within 1..={}",
                self.reader.max_limit
            )));
        }
        if self.projector.query_limit == 0 {
            return Err(ConfigError::Invalid(
                "projector.query_limit must be positive".to_string(),
            ));
        }
        if self.jetstream.bucket.is_empty() {
            return Err(ConfigError::Invalid("jetstream.bucket is empty".to_string()));
        }
        Ok(())
    }
}

/// Retry and backfill settings of the global indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Attempts per changeset before giving up on a contended counter
    pub max_attempts: u32,
    /// First backoff after a lost counter race
    pub initial_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
    /// Predecessors read per scan while backfilling
    pub backfill_batch: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 5,
            max_backoff_ms: 500,
            backfill_batch: 100,
        }
    }
}

/// Limits of the read handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Limit used when a global read does not name one
    pub default_limit: usize,
    /// Largest accepted limit
    pub max_limit: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 1000,
        }
    }
}

/// Commit handler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Most changesets listed in a conflict response
    pub forthcoming_limit: usize,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            forthcoming_limit: 100,
        }
    }
}

/// Analysis projection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Changesets read per global page
    pub query_limit: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self { query_limit: 1000 }
    }
}

/// JetStream key-value backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JetStreamStoreConfig {
    /// Key-value bucket name
    pub bucket: String,
    /// Bucket description
    pub description: String,
    /// Revisions kept per key
    pub history: i64,
    /// Streams whose tail position is cached
    pub tail_cache_size: usize,
}

impl Default for JetStreamStoreConfig {
    fn default() -> Self {
        Self {
            bucket: "event-store".to_string(),
            description: "Changeset event store".to_string(),
            history: 1,
            tail_cache_size: 1024,
        }
    }
}
