// Copyright 2025 Cowboy AI, LLC.

//! Global positions and their checkpoint encoding
//!
//! Every changeset eventually receives a `(page, item)` position in the
//! cross-stream ordering. Clients page through that ordering with a single
//! integer checkpoint, `page * PAGE_SIZE + item`.
//!
//! `PAGE_SIZE` is baked into every stored position. Changing it invalidates
//! the whole global index and needs an out-of-band rebuild, so it is a
//! constant rather than configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of items on one page of the global ordering
pub const PAGE_SIZE: u64 = 1000;

/// Client-facing cursor into the global ordering
pub type Checkpoint = u64;

/// Position of a changeset in the global ordering
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct GlobalPosition {
    /// Page number
    pub page: u64,
    /// Item within the page, always below `PAGE_SIZE`
    pub item: u64,
}

impl GlobalPosition {
    /// The very first position handed out
    pub const FIRST: GlobalPosition = GlobalPosition { page: 0, item: 0 };

    /// Create a position
    pub fn new(page: u64, item: u64) -> Self {
        Self { page, item }
    }

    /// Position following this one, rolling over to the next page when full
    pub fn next(self) -> Self {
        let item = self.item + 1;
        if item >= PAGE_SIZE {
            Self {
                page: self.page + 1,
                item: 0,
            }
        } else {
            Self {
                page: self.page,
                item,
            }
        }
    }

    /// Encode as a checkpoint
    pub fn to_checkpoint(self) -> Checkpoint {
        self.page * PAGE_SIZE + self.item
    }

    /// Decode a checkpoint
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            page: checkpoint / PAGE_SIZE,
            item: checkpoint % PAGE_SIZE,
        }
    }
}

impl fmt::Display for GlobalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.item)
    }
}

/// Position after `last`; `None` means nothing has been assigned yet
pub fn next_position(last: Option<GlobalPosition>) -> GlobalPosition {
    match last {
        Some(position) => position.next(),
        None => GlobalPosition::FIRST,
    }
}

/// `page * PAGE_SIZE + item`
pub fn to_checkpoint(page: u64, item: u64) -> Checkpoint {
    GlobalPosition::new(page, item).to_checkpoint()
}

/// `(checkpoint / PAGE_SIZE, checkpoint % PAGE_SIZE)`
pub fn to_position(checkpoint: Checkpoint) -> (u64, u64) {
    let position = GlobalPosition::from_checkpoint(checkpoint);
    (position.page, position.item)
}
