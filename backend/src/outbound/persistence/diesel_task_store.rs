//! PostgreSQL-backed `TaskStore` implementation using Diesel ORM.
//!
//! Progress writes are guarded in SQL: `GREATEST` keeps the stored percent
//! monotonic and the state filter leaves terminal tasks untouched, so a late
//! or duplicate writer cannot rewind a task.

use async_trait::async_trait;
use diesel::dsl::now;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel_async::RunQueryDsl;
use serde_json::Value;

use super::diesel_error_mapping::{DieselFailure, classify_diesel_error, map_pool_error_message};
use super::models::{NewTaskRow, TaskRow};
use super::pool::{DbPool, PoolError};
use super::schema::analysis_tasks;
use crate::domain::ports::{TaskStore, TaskStoreError};
use crate::domain::{ProgressUpdate, TaskId, TaskKind, TaskRecord, TaskState};

diesel::define_sql_function! {
    /// PostgreSQL `GREATEST` over two integers.
    fn greatest(a: Integer, b: Integer) -> Integer;
}

const UNFINISHED_STATES: [&str; 2] = [TaskState::Pending.as_str(), TaskState::Progress.as_str()];

/// Diesel-backed durable task state.
///
/// # Examples
///
/// ```rust,no_run
/// use lesion_bank::outbound::persistence::{DbPool, DieselTaskStore, PoolConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = DbPool::new(PoolConfig::new("postgres://localhost/lesion_bank")).await?;
/// let tasks = DieselTaskStore::new(pool);
/// # let _ = tasks;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DieselTaskStore {
    pool: DbPool,
}

impl DieselTaskStore {
    /// Create a store over `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn ensure_exists(&self, task_id: TaskId) -> Result<(), TaskStoreError> {
        match self.find(task_id).await? {
            Some(_) => Ok(()),
            None => Err(TaskStoreError::not_found(task_id.to_string())),
        }
    }
}

fn map_pool_error(error: PoolError) -> TaskStoreError {
    TaskStoreError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error) -> TaskStoreError {
    match classify_diesel_error(error, "task store") {
        DieselFailure::Connection(message) => TaskStoreError::connection(message),
        DieselFailure::NotFound => TaskStoreError::query("record not found"),
        DieselFailure::Conflict(message) | DieselFailure::Query(message) => {
            TaskStoreError::query(message)
        }
    }
}

#[async_trait]
impl TaskStore for DieselTaskStore {
    async fn create(&self, task_id: TaskId, kind: TaskKind) -> Result<(), TaskStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::insert_into(analysis_tasks::table)
            .values(NewTaskRow {
                id: *task_id.as_uuid(),
                kind: kind.as_str(),
                state: TaskState::Pending.as_str(),
                progress: 0,
                current_step: 1,
                total_steps: kind.total_steps(),
                message: String::new(),
            })
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(())
    }

    async fn record_progress(
        &self,
        task_id: TaskId,
        update: &ProgressUpdate,
    ) -> Result<(), TaskStoreError> {
        let updated = {
            let mut conn = self.pool.get().await.map_err(map_pool_error)?;
            diesel::update(
                analysis_tasks::table
                    .filter(analysis_tasks::id.eq(*task_id.as_uuid()))
                    .filter(analysis_tasks::state.eq_any(UNFINISHED_STATES)),
            )
            .set((
                analysis_tasks::state.eq(TaskState::Progress.as_str()),
                analysis_tasks::progress.eq(greatest(analysis_tasks::progress, update.percent)),
                analysis_tasks::current_step.eq(update.current_step),
                analysis_tasks::total_steps.eq(update.total_steps),
                analysis_tasks::message.eq(&update.message),
                analysis_tasks::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?
        };
        if updated == 0 {
            // Terminal tasks ignore late progress; only a missing task is an error.
            self.ensure_exists(task_id).await?;
        }
        Ok(())
    }

    async fn complete(&self, task_id: TaskId, result: &Value) -> Result<(), TaskStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(analysis_tasks::table.find(*task_id.as_uuid()))
            .set((
                analysis_tasks::state.eq(TaskState::Success.as_str()),
                analysis_tasks::progress.eq(100),
                analysis_tasks::current_step.eq(analysis_tasks::total_steps),
                analysis_tasks::result.eq(Some(result)),
                analysis_tasks::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        if updated == 0 {
            return Err(TaskStoreError::not_found(task_id.to_string()));
        }
        Ok(())
    }

    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), TaskStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(analysis_tasks::table.find(*task_id.as_uuid()))
            .set((
                analysis_tasks::state.eq(TaskState::Failure.as_str()),
                analysis_tasks::message.eq(error),
                analysis_tasks::error.eq(Some(error)),
                analysis_tasks::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        if updated == 0 {
            return Err(TaskStoreError::not_found(task_id.to_string()));
        }
        Ok(())
    }

    async fn find(&self, task_id: TaskId) -> Result<Option<TaskRecord>, TaskStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = analysis_tasks::table
            .find(*task_id.as_uuid())
            .select(TaskRow::as_select())
            .first::<TaskRow>(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        row.map(|row| TaskRecord::try_from(row).map_err(TaskStoreError::query))
            .transpose()
    }

    async fn fail_unfinished(&self, error: &str) -> Result<usize, TaskStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::update(analysis_tasks::table.filter(analysis_tasks::state.eq_any(UNFINISHED_STATES)))
            .set((
                analysis_tasks::state.eq(TaskState::Failure.as_str()),
                analysis_tasks::message.eq(error),
                analysis_tasks::error.eq(Some(error)),
                analysis_tasks::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn unfinished_states_match_stored_labels() {
        assert_eq!(UNFINISHED_STATES, ["PENDING", "PROGRESS"]);
        for label in UNFINISHED_STATES {
            let state = TaskState::from_label(label).expect("known state");
            assert!(!state.is_terminal());
        }
    }

    #[rstest]
    fn checkout_failures_are_connection_errors() {
        assert_eq!(
            map_pool_error(PoolError::build("bad url")),
            TaskStoreError::connection("bad url")
        );
    }
}
