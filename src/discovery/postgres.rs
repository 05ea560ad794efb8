//! Postgres-backed key range source.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::KeyRangeSource;
use crate::config::{is_plain_identifier, SourceConfig};
use crate::error::{BatchError, BatchResult};

/// Reads `MIN(column)` / `MAX(column)` from a table
#[derive(Debug, Clone)]
pub struct PgKeyRangeSource {
    pool: PgPool,
    table: String,
    column: String,
}

impl PgKeyRangeSource {
    pub fn new(
        pool: PgPool,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> BatchResult<Self> {
        let table = table.into();
        let column = column.into();
        for (field, value) in [("table", &table), ("column", &column)] {
            if !is_plain_identifier(value) {
                return Err(BatchError::Validation(format!(
                    "invalid source {field} identifier: {value}"
                )));
            }
        }
        Ok(Self {
            pool,
            table,
            column,
        })
    }

    pub fn from_config(pool: PgPool, source: &SourceConfig) -> BatchResult<Self> {
        Self::new(pool, source.table.clone(), source.column.clone())
    }
}

#[async_trait]
impl KeyRangeSource for PgKeyRangeSource {
    async fn key_range(&self) -> BatchResult<Option<(i64, i64)>> {
        let sql = format!(
            "SELECT MIN({column})::BIGINT AS min_value, MAX({column})::BIGINT AS max_value FROM {table}",
            column = self.column,
            table = self.table,
        );

        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BatchError::Discovery(e.to_string()))?;

        let min: Option<i64> = row
            .try_get("min_value")
            .map_err(|e| BatchError::Discovery(e.to_string()))?;
        let max: Option<i64> = row
            .try_get("max_value")
            .map_err(|e| BatchError::Discovery(e.to_string()))?;

        Ok(min.zip(max))
    }

    fn describe(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}
