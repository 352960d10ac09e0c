//! Durable analysis task state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::Error;

/// Opaque task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| Error::invalid_request(format!("invalid task id: {value}")))
    }
}

/// Workflow a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Correlate a submitted map against the corpus.
    Decode,
    /// Compute a connectivity map from a drawn region, then decode it.
    FullAnalysis,
}

impl TaskKind {
    /// Stored label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::FullAnalysis => "full_analysis",
        }
    }

    /// Parse a stored label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "decode" => Some(Self::Decode),
            "full_analysis" => Some(Self::FullAnalysis),
            _ => None,
        }
    }

    /// Number of workflow stages.
    pub const fn total_steps(self) -> i32 {
        match self {
            Self::Decode => 1,
            Self::FullAnalysis => 2,
        }
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Accepted, not yet started.
    Pending,
    /// Running.
    Progress,
    /// Finished with a result.
    Success,
    /// Finished with an error.
    Failure,
}

impl TaskState {
    /// Stored label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Progress => "PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    /// Parse a stored label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "PENDING" => Some(Self::Pending),
            "PROGRESS" => Some(Self::Progress),
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            _ => None,
        }
    }

    /// True once no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Progress snapshot written while a task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Overall percent complete, 0 to 100.
    pub percent: i32,
    /// One-based stage index.
    pub current_step: i32,
    /// Number of stages.
    pub total_steps: i32,
    /// Human-readable status line.
    pub message: String,
}

/// Pollable task status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Task identifier.
    pub task_id: TaskId,
    /// Workflow.
    pub kind: TaskKind,
    /// Lifecycle state.
    pub state: TaskState,
    /// Overall percent complete.
    pub progress_percent: i32,
    /// One-based stage index.
    pub current_step: i32,
    /// Number of stages.
    pub total_steps: i32,
    /// Latest status line, or the failure message.
    pub message: String,
}

/// Full persisted task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// Pollable status.
    pub status: TaskStatus,
    /// Result payload once successful.
    pub result: Option<Value>,
    /// Failure message once failed.
    pub error: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Terminal outcome returned by `get_result`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    /// Result payload of a successful task.
    Success {
        /// Workflow result.
        result: Value,
    },
    /// Failure message of a failed task.
    Failure {
        /// Recorded error.
        error: String,
    },
}
