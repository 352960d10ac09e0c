//! In-memory blob store, task store, and reduction queue.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use mockable::{Clock, DefaultClock};
use serde_json::Value;

use crate::domain::ports::{
    BlobStore, BlobStoreError, ReductionJob, ReductionQueue, ReductionQueueError, TaskStore,
    TaskStoreError,
};
use crate::domain::{ProgressUpdate, TaskId, TaskKind, TaskRecord, TaskState, TaskStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Blob store holding bytes in a map.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys in order.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.blobs).keys().cloned().collect()
    }

    /// Bytes stored under `key`.
    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.blobs).get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        lock(&self.blobs)
            .get(key)
            .cloned()
            .ok_or_else(|| BlobStoreError::not_found(key))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
            return Err(BlobStoreError::invalid_key(key));
        }
        lock(&self.blobs).insert(key.to_owned(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        lock(&self.blobs).remove(key);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://blobs/{key}")
    }
}

/// Task store holding records in a map.
///
/// Applies the same guards as the database adapter: progress never moves
/// backwards and terminal tasks ignore further progress.
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    history: Mutex<Vec<(TaskId, i32)>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(DefaultClock))
    }
}

impl InMemoryTaskStore {
    /// Empty store using the system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store stamping records with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Every stored percent written for `task_id`, in write order.
    pub fn progress_history(&self, task_id: TaskId) -> Vec<i32> {
        lock(&self.history)
            .iter()
            .filter(|(id, _)| *id == task_id)
            .map(|(_, percent)| *percent)
            .collect()
    }

    /// Insert a task directly, as a previous process would have left it.
    pub fn seed(&self, task_id: TaskId, kind: TaskKind, state: TaskState, percent: i32) {
        let now = self.clock.utc();
        lock(&self.tasks).insert(
            task_id,
            TaskRecord {
                status: TaskStatus {
                    task_id,
                    kind,
                    state,
                    progress_percent: percent,
                    current_step: 1,
                    total_steps: kind.total_steps(),
                    message: String::new(),
                },
                result: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    fn update<F>(&self, task_id: TaskId, apply: F) -> Result<(), TaskStoreError>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let now = self.clock.utc();
        let mut tasks = lock(&self.tasks);
        let record = tasks
            .get_mut(&task_id)
            .ok_or_else(|| TaskStoreError::not_found(task_id.to_string()))?;
        apply(record);
        record.updated_at = now;
        lock(&self.history).push((task_id, record.status.progress_percent));
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task_id: TaskId, kind: TaskKind) -> Result<(), TaskStoreError> {
        self.seed(task_id, kind, TaskState::Pending, 0);
        Ok(())
    }

    async fn record_progress(
        &self,
        task_id: TaskId,
        update: &ProgressUpdate,
    ) -> Result<(), TaskStoreError> {
        self.update(task_id, |record| {
            if record.status.state.is_terminal() {
                return;
            }
            record.status.state = TaskState::Progress;
            record.status.progress_percent = record.status.progress_percent.max(update.percent);
            record.status.current_step = update.current_step;
            record.status.total_steps = update.total_steps;
            record.status.message.clone_from(&update.message);
        })
    }

    async fn complete(&self, task_id: TaskId, result: &Value) -> Result<(), TaskStoreError> {
        self.update(task_id, |record| {
            record.status.state = TaskState::Success;
            record.status.progress_percent = 100;
            record.status.current_step = record.status.total_steps;
            record.result = Some(result.clone());
        })
    }

    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), TaskStoreError> {
        self.update(task_id, |record| {
            record.status.state = TaskState::Failure;
            record.status.message = error.to_owned();
            record.error = Some(error.to_owned());
        })
    }

    async fn find(&self, task_id: TaskId) -> Result<Option<TaskRecord>, TaskStoreError> {
        Ok(lock(&self.tasks).get(&task_id).cloned())
    }

    async fn fail_unfinished(&self, error: &str) -> Result<usize, TaskStoreError> {
        let now = self.clock.utc();
        let mut failed = 0;
        for record in lock(&self.tasks).values_mut() {
            if !record.status.state.is_terminal() {
                record.status.state = TaskState::Failure;
                record.status.message = error.to_owned();
                record.error = Some(error.to_owned());
                record.updated_at = now;
                failed += 1;
            }
        }
        Ok(failed)
    }
}

/// Reduction queue that records jobs instead of running them.
#[derive(Default)]
pub struct RecordingReductionQueue {
    jobs: Mutex<Vec<ReductionJob>>,
    reject_with: Mutex<Option<String>>,
}

impl RecordingReductionQueue {
    /// Queue accepting every job.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make later enqueues fail with `message`.
    pub fn reject_with(&self, message: &str) {
        *lock(&self.reject_with) = Some(message.to_owned());
    }

    /// Take the jobs recorded so far.
    pub fn drain(&self) -> Vec<ReductionJob> {
        std::mem::take(&mut *lock(&self.jobs))
    }
}

#[async_trait]
impl ReductionQueue for RecordingReductionQueue {
    async fn enqueue(&self, job: ReductionJob) -> Result<(), ReductionQueueError> {
        if let Some(message) = lock(&self.reject_with).clone() {
            return Err(ReductionQueueError::unavailable(message));
        }
        lock(&self.jobs).push(job);
        Ok(())
    }
}
