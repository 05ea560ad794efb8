//! # Wire Messages
//!
//! Work requests published by the master and replies published by workers.
//! Both serialize to camelCase JSON bodies:
//!
//! ```text
//! {"stepName": "slaveStep", "executionId": 12, "context": {"minValue": 1, "maxValue": 1000}}
//! {"executionId": 12, "status": "COMPLETED", "failureInfo": null}
//! ```

use serde::{Deserialize, Serialize};

use crate::models::PartitionBounds;
use crate::state_machine::ExecutionStatus;

/// Partition bounds as carried in a work request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub min_value: i64,
    pub max_value: i64,
}

impl From<PartitionBounds> for RequestContext {
    fn from(bounds: PartitionBounds) -> Self {
        Self {
            min_value: bounds.lower,
            max_value: bounds.upper,
        }
    }
}

impl From<RequestContext> for PartitionBounds {
    fn from(context: RequestContext) -> Self {
        PartitionBounds::new(context.min_value, context.max_value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    pub step_name: String,
    pub execution_id: i64,
    pub context: RequestContext,
}

impl WorkRequest {
    pub fn new(step_name: impl Into<String>, execution_id: i64, bounds: PartitionBounds) -> Self {
        Self {
            step_name: step_name.into(),
            execution_id,
            context: bounds.into(),
        }
    }

    pub fn bounds(&self) -> PartitionBounds {
        self.context.into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub execution_id: i64,
    pub status: ExecutionStatus,
    pub failure_info: Option<String>,
}

impl Reply {
    pub fn new(execution_id: i64, status: ExecutionStatus, failure_info: Option<String>) -> Self {
        Self {
            execution_id,
            status,
            failure_info,
        }
    }

    pub fn failed(execution_id: i64, failure_info: impl Into<String>) -> Self {
        Self::new(execution_id, ExecutionStatus::Failed, Some(failure_info.into()))
    }
}
