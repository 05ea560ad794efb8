//! # Partition Model
//!
//! A partition is one contiguous, inclusive slice of a table's key space.
//! Bounds with `lower > upper` describe an empty range (empty source table);
//! workers complete those without touching the source.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionBounds {
    pub lower: i64,
    pub upper: i64,
}

impl PartitionBounds {
    pub fn new(lower: i64, upper: i64) -> Self {
        Self { lower, upper }
    }

    /// The canonical empty range used when the source table has no rows
    pub fn empty() -> Self {
        Self { lower: 0, upper: -1 }
    }

    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    /// Number of keys covered, 0 for an empty range. Saturates for the full i64 span.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            let span = i128::from(self.upper) - i128::from(self.lower) + 1;
            u64::try_from(span).unwrap_or(u64::MAX)
        }
    }

    pub fn contains(&self, key: i64) -> bool {
        self.lower <= key && key <= self.upper
    }
}

impl fmt::Display for PartitionBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub index: usize,
    pub bounds: PartitionBounds,
}

impl Partition {
    pub fn new(index: usize, lower: i64, upper: i64) -> Self {
        Self {
            index,
            bounds: PartitionBounds::new(lower, upper),
        }
    }

    pub fn lower_bound(&self) -> i64 {
        self.bounds.lower
    }

    pub fn upper_bound(&self) -> i64 {
        self.bounds.upper
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}
