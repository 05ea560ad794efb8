//! # Partition Batch Configuration
//!
//! Typed configuration shared by the master and worker processes. Values are
//! merged from TOML files and `PARTITION__*` environment variables by
//! [`ConfigManager`], then validated before anything connects to the database
//! or the broker.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use partition_batch::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let grid_size = manager.config().job.grid_size;
//! let poll_interval = manager.config().job.poll_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{self, chunking, timing};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/partition.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    pub database: DatabaseConfig,
    pub job: JobConfig,
    pub source: SourceConfig,
    pub runner: RunnerConfig,
    pub queues: QueueConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/partition_batch_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    /// Connection URL with any password replaced, for logging.
    pub fn sanitized_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((credentials, host)) = rest.rsplit_once('@') else {
            return self.url.clone();
        };
        match credentials.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => self.url.clone(),
        }
    }
}

/// Master-side job settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JobConfig {
    pub name: String,
    /// Step name every work request carries; workers resolve it locally
    pub step_name: String,
    pub grid_size: u32,
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub reply_poll_interval_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: constants::DEFAULT_JOB_NAME.to_string(),
            step_name: constants::DEFAULT_STEP_NAME.to_string(),
            grid_size: constants::DEFAULT_GRID_SIZE,
            poll_interval_ms: timing::DEFAULT_POLL_INTERVAL_MS,
            poll_timeout_ms: timing::DEFAULT_POLL_TIMEOUT_MS,
            reply_poll_interval_ms: timing::DEFAULT_REPLY_POLL_INTERVAL_MS,
        }
    }
}

impl JobConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn reply_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reply_poll_interval_ms)
    }
}

/// Table and key column the job partitions
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub table: String,
    pub column: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            table: "customer".to_string(),
            column: "id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub destination_table: String,
    /// Rows fetched per read query
    pub page_size: u32,
    /// Rows written per transaction
    pub chunk_size: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            destination_table: "new_customer".to_string(),
            page_size: chunking::DEFAULT_PAGE_SIZE,
            chunk_size: chunking::DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub request_queue: String,
    pub reply_queue: String,
    /// Workers publish replies only when enabled; the master never depends on them
    pub reply_enabled: bool,
    pub visibility_timeout_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            request_queue: constants::DEFAULT_REQUEST_QUEUE.to_string(),
            reply_queue: constants::DEFAULT_REPLY_QUEUE.to_string(),
            reply_enabled: true,
            visibility_timeout_seconds: timing::DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn all_queue_names(&self) -> Vec<String> {
        vec![self.request_queue.clone(), self.reply_queue.clone()]
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent handler loops in one worker process
    pub concurrency: u32,
    pub polling_interval_ms: u64,
    pub batch_size: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: constants::DEFAULT_GRID_SIZE,
            polling_interval_ms: timing::DEFAULT_WORKER_POLL_INTERVAL_MS,
            batch_size: 1,
        }
    }
}

impl WorkerConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

impl BatchConfig {
    /// Validate values that would otherwise fail late, at dispatch or query time.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.job.grid_size < 1 {
            return Err(ConfigurationError::invalid_value(
                "job.grid_size",
                self.job.grid_size,
                "grid size must be at least 1",
            ));
        }
        if self.job.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "job.poll_interval_ms",
                0,
                "poll interval must be positive",
            ));
        }
        if self.job.poll_timeout_ms < self.job.poll_interval_ms {
            return Err(ConfigurationError::invalid_value(
                "job.poll_timeout_ms",
                self.job.poll_timeout_ms,
                "poll timeout must not be shorter than the poll interval",
            ));
        }
        if self.job.reply_poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "job.reply_poll_interval_ms",
                0,
                "reply poll interval must be positive",
            ));
        }
        if self.job.step_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "step_name",
                "job",
            ));
        }
        if self.runner.page_size < 1 {
            return Err(ConfigurationError::invalid_value(
                "runner.page_size",
                self.runner.page_size,
                "page size must be at least 1",
            ));
        }
        if self.runner.chunk_size < 1 {
            return Err(ConfigurationError::invalid_value(
                "runner.chunk_size",
                self.runner.chunk_size,
                "chunk size must be at least 1",
            ));
        }
        if self.worker.concurrency < 1 {
            return Err(ConfigurationError::invalid_value(
                "worker.concurrency",
                self.worker.concurrency,
                "worker concurrency must be at least 1",
            ));
        }
        if self.worker.batch_size < 1 {
            return Err(ConfigurationError::invalid_value(
                "worker.batch_size",
                self.worker.batch_size,
                "worker batch size must be at least 1",
            ));
        }
        if self.queues.visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.visibility_timeout_seconds",
                0,
                "visibility timeout must be positive",
            ));
        }

        for (field, value) in [
            ("source.table", &self.source.table),
            ("source.column", &self.source.column),
            ("runner.destination_table", &self.runner.destination_table),
            ("queues.request_queue", &self.queues.request_queue),
            ("queues.reply_queue", &self.queues.reply_queue),
        ] {
            if !is_plain_identifier(value) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be a plain identifier (letters, digits, underscore; not starting with a digit)",
                ));
            }
        }

        if self.queues.request_queue == self.queues.reply_queue {
            return Err(ConfigurationError::invalid_value(
                "queues.reply_queue",
                &self.queues.reply_queue,
                "reply queue must differ from the request queue",
            ));
        }

        Ok(())
    }
}

/// Identifiers are interpolated into SQL and queue names, so only plain ones pass.
pub fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    value.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
