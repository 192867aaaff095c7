//! Dirty-block accounting.
//!
//! A [`BlockRangeSet`] records writes for one (file, observer) pair; a
//! [`FileTracker`] owns every set attached to one file and fans write and
//! truncate events out to all of them.

mod block_range_set;
mod file_tracker;
pub use block_range_set::*;
pub use file_tracker::*;


use crate::constants::STATUS_OK;
use crate::constants::STATUS_OVERFLOWED;
use crate::constants::STATUS_TRUNCATED;

/// One entry of a drained change list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyUnit {
    /// A single dirty block
    Block(u64),
    /// A run of contiguous dirty blocks, `length >= 2`
    Range { first: u64, length: u64 },
}

impl DirtyUnit {
    pub(crate) fn from_span(
        first: u64,
        last: u64,
    ) -> Self {
        if first == last {
            DirtyUnit::Block(first)
        } else {
            DirtyUnit::Range {
                first,
                length: last - first + 1,
            }
        }
    }

    pub fn first_block(&self) -> u64 {
        match *self {
            DirtyUnit::Block(b) => b,
            DirtyUnit::Range { first, .. } => first,
        }
    }

    pub fn last_block(&self) -> u64 {
        match *self {
            DirtyUnit::Block(b) => b,
            DirtyUnit::Range { first, length } => first + length - 1,
        }
    }

    pub fn block_count(&self) -> u64 {
        match *self {
            DirtyUnit::Block(_) => 1,
            DirtyUnit::Range { length, .. } => length,
        }
    }
}

/// Condition reported alongside a drained change list
///
/// Neither value is a failure: both tell the observer its record is
/// approximate and it should re-read more conservatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainStatus {
    #[default]
    Ok,
    /// The file shrank since the last complete drain
    Truncated,
    /// Ranges were collapsed into one bounding range, or dirty blocks past
    /// the reportable range were folded into its last block
    Overflowed,
}

impl DrainStatus {
    pub fn code(self) -> i32 {
        match self {
            DrainStatus::Ok => STATUS_OK,
            DrainStatus::Truncated => STATUS_TRUNCATED,
            DrainStatus::Overflowed => STATUS_OVERFLOWED,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            STATUS_OK => Some(DrainStatus::Ok),
            STATUS_TRUNCATED => Some(DrainStatus::Truncated),
            STATUS_OVERFLOWED => Some(DrainStatus::Overflowed),
            _ => None,
        }
    }
}

/// Result of a drain: the status and the units handed out, ascending
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    pub status: DrainStatus,
    pub units: Vec<DirtyUnit>,
}
