use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single partition's step execution.
///
/// Stored upper-case in the ledger and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Record written by the dispatcher; no worker has claimed it yet
    Starting,
    /// A worker claimed the record and is running the partition
    Started,
    Completed,
    Failed,
    Stopped,
    /// Terminal-unknown; only ever written by the dispatcher's deadline
    Unknown,
}

impl ExecutionStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Stopped | Self::Unknown
        )
    }

    /// Terminal states that make the owning job fail
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Non-terminal states, used when the deadline sweeps unresolved records
    pub fn non_terminal() -> &'static [ExecutionStatus] {
        &[Self::Starting, Self::Started]
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(Self::Starting),
            "STARTED" => Ok(Self::Started),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self::Starting
    }
}

/// Aggregated status of a job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Started,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    /// Fold partition statuses into a job status.
    ///
    /// FAILED when any partition failed or is unknown, STOPPED when any was
    /// stopped, COMPLETED only when every partition completed. Partitions still
    /// in flight keep the job STARTED.
    pub fn aggregate<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a ExecutionStatus>,
    {
        let mut stopped = false;
        let mut pending = false;
        for status in statuses {
            match status {
                ExecutionStatus::Failed | ExecutionStatus::Unknown => return Self::Failed,
                ExecutionStatus::Stopped => stopped = true,
                ExecutionStatus::Starting | ExecutionStatus::Started => pending = true,
                ExecutionStatus::Completed => {}
            }
        }
        if pending {
            Self::Started
        } else if stopped {
            Self::Stopped
        } else {
            Self::Completed
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Self::Started),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}
