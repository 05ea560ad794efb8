//! # Range Discovery
//!
//! Splits a key column's `[MIN, MAX]` into `grid_size` contiguous, inclusive,
//! non-overlapping partitions.
//!
//! With `target = ceil((max - min + 1) / N)`, partition `i` covers
//! `[min + i*target, min + (i+1)*target - 1]`, clamped to `max`. Partitions that
//! start past `max` (small ranges, large grids) and every partition of an empty
//! table get the empty range `[0, -1]`, so the grid always has `N` entries.

pub mod postgres;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{BatchError, BatchResult};
use crate::models::{Partition, PartitionBounds};

pub use postgres::PgKeyRangeSource;

/// Source of the `(MIN, MAX)` of a key column; `None` for an empty table
#[async_trait]
pub trait KeyRangeSource: Send + Sync {
    async fn key_range(&self) -> BatchResult<Option<(i64, i64)>>;

    /// Human-readable source name for logs
    fn describe(&self) -> String;
}

/// Fixed key range, for tests and callers that already know the bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticKeyRange(pub Option<(i64, i64)>);

#[async_trait]
impl KeyRangeSource for StaticKeyRange {
    async fn key_range(&self) -> BatchResult<Option<(i64, i64)>> {
        Ok(self.0)
    }

    fn describe(&self) -> String {
        match self.0 {
            Some((min, max)) => format!("static[{min}, {max}]"),
            None => "static[empty]".to_string(),
        }
    }
}

/// Compute the partition grid for an optional `(min, max)` key range
pub fn compute_partitions(range: Option<(i64, i64)>, grid_size: u32) -> BatchResult<Vec<Partition>> {
    if grid_size < 1 {
        return Err(BatchError::Validation(format!(
            "grid size must be at least 1, got {grid_size}"
        )));
    }
    let n = grid_size as usize;

    let Some((min, max)) = range else {
        return Ok((0..n)
            .map(|index| Partition {
                index,
                bounds: PartitionBounds::empty(),
            })
            .collect());
    };

    if min > max {
        return Err(BatchError::Discovery(format!(
            "minimum key {min} is greater than maximum key {max}"
        )));
    }

    let (min, max) = (i128::from(min), i128::from(max));
    let grid = i128::from(grid_size);
    let span = max - min + 1;
    let target = (span + grid - 1) / grid;

    let partitions = (0..n)
        .map(|index| {
            let i = index as i128;
            let lower = min + i * target;
            let upper = (min + (i + 1) * target - 1).min(max);
            let bounds = if lower > max {
                PartitionBounds::empty()
            } else {
                // Both values lie within [min, max], so they fit in i64
                PartitionBounds::new(lower as i64, upper as i64)
            };
            Partition { index, bounds }
        })
        .collect();

    Ok(partitions)
}

/// Discovers the key range of a source and grids it
pub struct ColumnRangePartitioner<S> {
    source: S,
    grid_size: u32,
}

impl<S: KeyRangeSource> ColumnRangePartitioner<S> {
    pub fn new(source: S, grid_size: u32) -> Self {
        Self { source, grid_size }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Query the range and compute partitions. Any failure is a discovery error.
    pub async fn partition(&self) -> BatchResult<Vec<Partition>> {
        let range = self.source.key_range().await.map_err(|e| match e {
            BatchError::Discovery(_) => e,
            other => BatchError::Discovery(other.to_string()),
        })?;

        debug!(
            source = %self.source.describe(),
            range = ?range,
            grid_size = self.grid_size,
            "Key range discovered"
        );

        let partitions = compute_partitions(range, self.grid_size)?;

        info!(
            source = %self.source.describe(),
            grid_size = self.grid_size,
            non_empty = partitions.iter().filter(|p| !p.is_empty()).count(),
            "Partitions computed"
        );
        Ok(partitions)
    }
}

impl<S> std::fmt::Debug for ColumnRangePartitioner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnRangePartitioner")
            .field("grid_size", &self.grid_size)
            .finish()
    }
}
