// Copyright 2025 Cowboy AI, LLC.

//! Error types for event store operations

use crate::infrastructure::key_range_store::StoreError;
use thiserror::Error;

/// Errors that can occur in event store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStoreError {
    /// Another writer claimed the slot first (changeset append or counter advance)
    #[error("Concurrency conflict on {stream_id}/{changeset_id}")]
    ConcurrencyConflict {
        /// Stream whose slot was contended
        stream_id: String,
        /// Changeset id of the contended slot
        changeset_id: u64,
    },

    /// Request rejected before touching the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stream or changeset does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The underlying store failed for a reason other than a conditional check
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The global counter stayed contended for every allowed attempt
    #[error("Global counter still contended after {attempts} attempts")]
    CounterContended {
        /// Number of attempts made
        attempts: u32,
    },

    /// A changeset already holds a different global position than the one being written
    #[error("Inconsistent global index: {0}")]
    Inconsistent(String),
}

/// Result type for event store operations
pub type EventStoreResult<T> = Result<T, EventStoreError>;

impl EventStoreError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        EventStoreError::Validation(msg.into())
    }

    /// Translate a store error, mapping only a failed conditional check to a conflict
    pub fn from_store(err: StoreError, stream_id: &str, changeset_id: u64) -> Self {
        match err {
            StoreError::ConditionFailed { .. } => EventStoreError::ConcurrencyConflict {
                stream_id: stream_id.to_string(),
                changeset_id,
            },
            other => EventStoreError::StoreUnavailable(other.to_string()),
        }
    }

    /// Check if this is a concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(self, EventStoreError::Validation(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, EventStoreError::NotFound(_))
    }
}

impl From<StoreError> for EventStoreError {
    /// Plain reads never carry a condition, so every store error is an outage here
    fn from(err: StoreError) -> Self {
        EventStoreError::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = EventStoreError::ConcurrencyConflict {
            stream_id: "orders-1".to_string(),
            changeset_id: 3,
        };
        assert_eq!(err.to_string(), "Concurrency conflict on orders-1/3");

        let err = EventStoreError::validation("stream_id is a required value");
        assert_eq!(
            err.to_string(),
            "Validation error: stream_id is a required value"
        );

        let err = EventStoreError::NotFound("orders-1".to_string());
        assert_eq!(err.to_string(), "Not found: orders-1");

        let err = EventStoreError::CounterContended { attempts: 10 };
        assert_eq!(
            err.to_string(),
            "Global counter still contended after 10 attempts"
        );

        let err = EventStoreError::Inconsistent("orders-1/3 holds (0, 7)".to_string());
        assert_eq!(
            err.to_string(),
            "Inconsistent global index: orders-1/3 holds (0, 7)"
        );
    }

    #[test]
    fn test_only_condition_failure_becomes_conflict() {
        let conflict = EventStoreError::from_store(
            StoreError::ConditionFailed {
                key: "orders-1/2".to_string(),
            },
            "orders-1",
            2,
        );
        assert!(conflict.is_concurrency_conflict());

        let outage = EventStoreError::from_store(
            StoreError::Unavailable("connection reset".to_string()),
            "orders-1",
            2,
        );
        assert_eq!(
            outage,
            EventStoreError::StoreUnavailable("connection reset".to_string())
        );
        assert!(!outage.is_concurrency_conflict());
    }

    #[test]
    fn test_helper_method_exclusivity() {
        let conflict = EventStoreError::ConcurrencyConflict {
            stream_id: "s".to_string(),
            changeset_id: 1,
        };
        assert!(conflict.is_concurrency_conflict());
        assert!(!conflict.is_validation_error());
        assert!(!conflict.is_not_found());

        let validation = EventStoreError::validation("bad");
        assert!(validation.is_validation_error());
        assert!(!validation.is_concurrency_conflict());

        let missing = EventStoreError::NotFound("s".to_string());
        assert!(missing.is_not_found());
        assert!(!missing.is_validation_error());
    }
}
