//! Error types for partitioned batch execution.
//!

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    /// Range query failed; the job is aborted before anything is dispatched.
    #[error("Discovery error: {0}")]
    Discovery(String),
    /// Publishing a work request failed. The record stays STARTING and is
    /// resolved by the poll deadline.
    #[error("Dispatch error for execution {execution_id}: {reason}")]
    Dispatch { execution_id: i64, reason: String },
    #[error("Unknown step: {0}")]
    UnknownStep(String),
    #[error("Processing error for execution {execution_id}: {message}")]
    Processing { execution_id: i64, message: String },
    #[error("Timed out waiting for job execution {job_execution_id}: {unresolved} partition(s) unresolved")]
    Timeout {
        job_execution_id: i64,
        unresolved: usize,
    },
    #[error("Job execution {job_execution_id} finished with status {status}")]
    JobFailed {
        job_execution_id: i64,
        status: String,
    },
    #[error("Execution record not found: {0}")]
    ExecutionNotFound(i64),
    #[error("Invalid state transition for execution {execution_id}: {from} -> {to}")]
    StateTransition {
        execution_id: i64,
        from: String,
        to: String,
    },
    #[error("Database error: {0}")]
    Database(String),
    #[error("Messaging error: {0}")]
    Messaging(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl BatchError {
    /// Errors that fail a single partition and never abort the job.
    pub fn is_partition_local(&self) -> bool {
        matches!(
            self,
            Self::Dispatch { .. } | Self::UnknownStep(_) | Self::Processing { .. }
        )
    }
}

impl From<sqlx::Error> for BatchError {
    fn from(err: sqlx::Error) -> Self {
        BatchError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(error: serde_json::Error) -> Self {
        BatchError::Validation(format!("JSON serialization error: {error}"))
    }
}

impl From<MessagingError> for BatchError {
    fn from(error: MessagingError) -> Self {
        BatchError::Messaging(error.to_string())
    }
}

impl From<ConfigurationError> for BatchError {
    fn from(error: ConfigurationError) -> Self {
        BatchError::Configuration(error.to_string())
    }
}

pub type BatchResult<T> = Result<T, BatchError>;
