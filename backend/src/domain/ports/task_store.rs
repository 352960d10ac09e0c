//! Driven port for durable analysis task state.

use async_trait::async_trait;
use serde_json::Value;

use super::define_port_error;
use crate::domain::{ProgressUpdate, TaskId, TaskKind, TaskRecord};

define_port_error! {
    /// Errors raised by task stores.
    pub enum TaskStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "task store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "task store query failed: {message}",
        /// The task does not exist.
        NotFound { task_id: String } => "task {task_id} not found",
    }
}

/// Port for task lifecycle persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a PENDING task.
    async fn create(&self, task_id: TaskId, kind: TaskKind) -> Result<(), TaskStoreError>;

    /// Move a task to PROGRESS and record `update`.
    ///
    /// Implementations must never lower the stored percent and must ignore
    /// updates for tasks already in a terminal state.
    async fn record_progress(
        &self,
        task_id: TaskId,
        update: &ProgressUpdate,
    ) -> Result<(), TaskStoreError>;

    /// Move a task to SUCCESS with its result payload and 100 percent.
    async fn complete(&self, task_id: TaskId, result: &Value) -> Result<(), TaskStoreError>;

    /// Move a task to FAILURE, keeping its last progress.
    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), TaskStoreError>;

    /// Lookup a task.
    async fn find(&self, task_id: TaskId) -> Result<Option<TaskRecord>, TaskStoreError>;

    /// Fail every PENDING or PROGRESS task with `error`; returns the count.
    async fn fail_unfinished(&self, error: &str) -> Result<usize, TaskStoreError>;
}
