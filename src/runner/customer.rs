//! # Customer Migration Runner
//!
//! Copies `customer` rows into `new_customer` for one partition:
//! keyset-paged reads ordered by id, written in transactional chunks.
//! Writes upsert on `id`, so a partition can always be rerun from its lower
//! bound.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::{PartitionRunner, RunSummary, RunnerError};
use crate::config::{is_plain_identifier, BatchConfig};
use crate::error::{BatchError, BatchResult};
use crate::models::PartitionBounds;

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: Option<NaiveDate>,
}

/// Per-row transform applied between read and write
pub type RowTransform = Arc<dyn Fn(CustomerRecord) -> Result<CustomerRecord, String> + Send + Sync>;

#[derive(Clone)]
pub struct CustomerMigrationRunner {
    pool: PgPool,
    source_table: String,
    key_column: String,
    destination_table: String,
    page_size: u32,
    chunk_size: u32,
    transform: Option<RowTransform>,
}

impl fmt::Debug for CustomerMigrationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomerMigrationRunner")
            .field("source_table", &self.source_table)
            .field("key_column", &self.key_column)
            .field("destination_table", &self.destination_table)
            .field("page_size", &self.page_size)
            .field("chunk_size", &self.chunk_size)
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

impl CustomerMigrationRunner {
    pub fn new(
        pool: PgPool,
        source_table: impl Into<String>,
        key_column: impl Into<String>,
        destination_table: impl Into<String>,
        page_size: u32,
        chunk_size: u32,
    ) -> BatchResult<Self> {
        let source_table = source_table.into();
        let key_column = key_column.into();
        let destination_table = destination_table.into();

        for value in [&source_table, &key_column, &destination_table] {
            if !is_plain_identifier(value) {
                return Err(BatchError::Validation(format!(
                    "invalid runner identifier: {value}"
                )));
            }
        }
        if page_size == 0 || chunk_size == 0 {
            return Err(BatchError::Validation(
                "page_size and chunk_size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            pool,
            source_table,
            key_column,
            destination_table,
            page_size,
            chunk_size,
            transform: None,
        })
    }

    pub fn from_config(pool: PgPool, config: &BatchConfig) -> BatchResult<Self> {
        Self::new(
            pool,
            config.source.table.clone(),
            config.source.column.clone(),
            config.runner.destination_table.clone(),
            config.runner.page_size,
            config.runner.chunk_size,
        )
    }

    pub fn with_transform(mut self, transform: RowTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Next page with key in `[from, upper]`
    async fn read_page(&self, from: i64, upper: i64) -> Result<Vec<CustomerRecord>, RunnerError> {
        let sql = format!(
            "SELECT {key} AS id, first_name, last_name, birthdate FROM {table} \
             WHERE {key} >= $1 AND {key} <= $2 ORDER BY {key} ASC LIMIT $3",
            key = self.key_column,
            table = self.source_table,
        );
        let rows = sqlx::query_as::<_, CustomerRecord>(&sql)
            .bind(from)
            .bind(upper)
            .bind(i64::from(self.page_size))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn write_chunk(&self, chunk: &[CustomerRecord]) -> Result<u64, RunnerError> {
        if chunk.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (id, first_name, last_name, birthdate) ",
            self.destination_table
        ));
        builder.push_values(chunk, |mut row, customer| {
            row.push_bind(customer.id)
                .push_bind(customer.first_name.clone())
                .push_bind(customer.last_name.clone())
                .push_bind(customer.birthdate);
        });
        // Reruns overwrite rows an earlier attempt already copied
        builder.push(
            " ON CONFLICT (id) DO UPDATE SET first_name = EXCLUDED.first_name, \
             last_name = EXCLUDED.last_name, birthdate = EXCLUDED.birthdate",
        );
        let written = builder.build().execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;
        Ok(written)
    }

    fn apply_transform(&self, record: CustomerRecord) -> Result<CustomerRecord, RunnerError> {
        match &self.transform {
            Some(transform) => {
                let id = record.id;
                transform(record)
                    .map_err(|e| RunnerError::processing(format!("transform failed at id {id}: {e}")))
            }
            None => Ok(record),
        }
    }
}

#[async_trait]
impl PartitionRunner for CustomerMigrationRunner {
    async fn run(
        &self,
        execution_id: i64,
        bounds: PartitionBounds,
    ) -> Result<RunSummary, RunnerError> {
        if bounds.is_empty() {
            debug!(execution_id, %bounds, "Empty partition, nothing to migrate");
            return Ok(RunSummary::default());
        }

        let chunk_size = self.chunk_size as usize;
        let mut summary = RunSummary::default();
        let mut pending: Vec<CustomerRecord> = Vec::with_capacity(chunk_size);
        let mut next = Some(bounds.lower);

        while let Some(from) = next {
            let page = self.read_page(from, bounds.upper).await?;
            let Some(last) = page.last() else {
                break;
            };
            // Keyset: resume after the last key seen; stop at the end of the key space
            next = if page.len() < self.page_size as usize {
                None
            } else {
                last.id.checked_add(1)
            };
            summary.read_count += page.len() as i64;

            for record in page {
                pending.push(self.apply_transform(record)?);
                if pending.len() >= chunk_size {
                    summary.write_count += self.write_chunk(&pending).await? as i64;
                    pending.clear();
                }
            }
        }
        summary.write_count += self.write_chunk(&pending).await? as i64;

        debug!(
            execution_id,
            %bounds,
            read_count = summary.read_count,
            write_count = summary.write_count,
            "Partition migrated"
        );
        Ok(summary)
    }
}
