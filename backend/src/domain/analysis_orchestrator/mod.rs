//! Asynchronous orchestration of decode and full-analysis tasks.
//!
//! Submissions are validated synchronously, persisted as PENDING tasks, and
//! executed on the tokio runtime behind a bounded worker pool. Each task
//! moves through PROGRESS updates to SUCCESS or FAILURE; every transition
//! is written to the [`TaskStore`] so a poller never sees a task vanish.
//! Cancellation is not supported.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::domain::imaging::Volume;
use crate::domain::port_error_mapping::{map_blob_error, map_codec_error, map_task_store_error};
use crate::domain::ports::{BlobStore, TaskStore, VolumeCodec};
use crate::domain::progress::{ProgressReporter, ScaledProgress, TaskProgressReporter};
use crate::domain::storage_keys::{generated_connectivity_key, generated_roi_key};
use crate::domain::{
    Error, TaskId, TaskKind, TaskOutcome, TaskState, TaskStatus, TaxonomyLevel, VisibilityScope,
};

mod runtime;

pub use runtime::{AnalysisOrchestratorPorts, AnalysisStages};

/// Failure recorded on tasks left unfinished by a previous process.
pub const INTERRUPTED_TASK_ERROR: &str = "task interrupted by worker restart";

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Tasks executing at once; further tasks wait as PENDING.
    pub max_concurrent_tasks: usize,
    /// Upper bound on one task's execution.
    pub task_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            task_timeout: Duration::from_secs(3600),
        }
    }
}

/// Work carried by a submitted task.
enum Workflow {
    Decode { query: Vec<f64> },
    FullAnalysis { roi: Volume },
}

impl Workflow {
    const fn kind(&self) -> TaskKind {
        match self {
            Self::Decode { .. } => TaskKind::Decode,
            Self::FullAnalysis { .. } => TaskKind::FullAnalysis,
        }
    }
}

struct TaskRequest {
    task_id: TaskId,
    level: TaxonomyLevel,
    scope: VisibilityScope,
    workflow: Workflow,
}

/// Submits, runs, and reports analysis tasks.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    tasks: Arc<dyn TaskStore>,
    blobs: Arc<dyn BlobStore>,
    codec: Arc<dyn VolumeCodec>,
    stages: AnalysisStages,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    permits: Arc<Semaphore>,
}

impl AnalysisOrchestrator {
    /// Build an orchestrator. Must be used inside a tokio runtime.
    pub fn new(
        ports: AnalysisOrchestratorPorts,
        stages: AnalysisStages,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            tasks: ports.tasks,
            blobs: ports.blobs,
            codec: ports.codec,
            stages,
            clock,
            config,
            permits,
        }
    }

    /// Submit a decode of `query`.
    ///
    /// The query is checked against the reference grid before a task is
    /// created, so invalid input never leaves a task behind.
    pub async fn submit_decode(
        &self,
        query: &Volume,
        level: TaxonomyLevel,
        scope: VisibilityScope,
    ) -> Result<TaskId, Error> {
        let query = self.stages.decode.mask_query(query)?;
        self.submit(level, scope, Workflow::Decode { query }).await
    }

    /// Submit a connectivity mapping of `roi` followed by a decode of the
    /// resulting map.
    pub async fn submit_full_analysis(
        &self,
        roi: Volume,
        level: TaxonomyLevel,
        scope: VisibilityScope,
    ) -> Result<TaskId, Error> {
        self.stages.mapping.validate_region(&roi)?;
        self.submit(level, scope, Workflow::FullAnalysis { roi })
            .await
    }

    /// Current status of `task_id`.
    pub async fn status(&self, task_id: TaskId) -> Result<TaskStatus, Error> {
        let record = self
            .tasks
            .find(task_id)
            .await
            .map_err(map_task_store_error)?
            .ok_or_else(|| task_not_found(task_id))?;
        Ok(record.status)
    }

    /// Terminal outcome of `task_id`; a conflict while it is still running.
    pub async fn result(&self, task_id: TaskId) -> Result<TaskOutcome, Error> {
        let record = self
            .tasks
            .find(task_id)
            .await
            .map_err(map_task_store_error)?
            .ok_or_else(|| task_not_found(task_id))?;
        match record.status.state {
            TaskState::Success => Ok(TaskOutcome::Success {
                result: record.result.unwrap_or(Value::Null),
            }),
            TaskState::Failure => Ok(TaskOutcome::Failure {
                error: record.error.unwrap_or(record.status.message),
            }),
            state @ (TaskState::Pending | TaskState::Progress) => {
                Err(Error::conflict(format!("task {task_id} has not finished"))
                    .with_details(json!({
                        "taskId": task_id.to_string(),
                        "state": state.as_str(),
                        "progressPercent": record.status.progress_percent,
                    })))
            }
        }
    }

    /// Fail every task a previous process left PENDING or PROGRESS.
    pub async fn recover_interrupted(&self) -> Result<usize, Error> {
        let failed = self
            .tasks
            .fail_unfinished(INTERRUPTED_TASK_ERROR)
            .await
            .map_err(map_task_store_error)?;
        if failed > 0 {
            warn!(failed, "marked interrupted analysis tasks as failed");
        }
        Ok(failed)
    }

    async fn submit(
        &self,
        level: TaxonomyLevel,
        scope: VisibilityScope,
        workflow: Workflow,
    ) -> Result<TaskId, Error> {
        let task_id = TaskId::random();
        let kind = workflow.kind();
        self.tasks
            .create(task_id, kind)
            .await
            .map_err(map_task_store_error)?;
        info!(task_id = %task_id, kind = kind.as_str(), level = %level, "analysis task submitted");

        let this = self.clone();
        tokio::spawn(async move {
            this.run(TaskRequest {
                task_id,
                level,
                scope,
                workflow,
            })
            .await;
        });
        Ok(task_id)
    }

    async fn run(self, request: TaskRequest) {
        let task_id = request.task_id;
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            self.record_failure(task_id, "analysis worker pool is closed")
                .await;
            return;
        };
        let started = self.clock.utc();

        let outcome = tokio::time::timeout(self.config.task_timeout, self.execute(&request)).await;
        let elapsed_ms = (self.clock.utc() - started).num_milliseconds();

        match outcome {
            Ok(Ok(result)) => match self.tasks.complete(task_id, &result).await {
                Ok(()) => info!(task_id = %task_id, elapsed_ms, "analysis task succeeded"),
                Err(err) => {
                    error!(task_id = %task_id, error = %err, "failed to record task success");
                }
            },
            Ok(Err(err)) => {
                error!(task_id = %task_id, elapsed_ms, error = %err, "analysis task failed");
                self.record_failure(task_id, err.message()).await;
            }
            Err(_) => {
                let message = format!(
                    "task timed out after {}s",
                    self.config.task_timeout.as_secs()
                );
                error!(task_id = %task_id, elapsed_ms, "analysis task timed out");
                self.record_failure(task_id, &message).await;
            }
        }
    }

    async fn execute(&self, request: &TaskRequest) -> Result<Value, Error> {
        let reporter = TaskProgressReporter::new(
            Arc::clone(&self.tasks),
            request.task_id,
            request.workflow.kind().total_steps(),
        );
        match &request.workflow {
            Workflow::Decode { query } => {
                reporter.report(0.0, "Starting decoding...").await;
                let outcome = self
                    .stages
                    .decode
                    .decode(query, request.level, request.scope, &reporter)
                    .await?;
                to_json(&outcome)
            }
            Workflow::FullAnalysis { roi } => self.full_analysis(request, roi, &reporter).await,
        }
    }

    async fn full_analysis(
        &self,
        request: &TaskRequest,
        roi: &Volume,
        reporter: &TaskProgressReporter,
    ) -> Result<Value, Error> {
        reporter.set_step(1);
        reporter
            .report(10.0, "Starting connectivity map computation...")
            .await;
        let map = self
            .stages
            .mapping
            .compute(roi, &ScaledProgress::new(reporter, 10.0, 50.0))
            .await?;
        reporter
            .report(50.0, "Connectivity map computation completed.")
            .await;

        let task_label = request.task_id.to_string();
        let lesion_mask_url = self
            .store_volume(generated_roi_key(&task_label), roi.clone())
            .await?;
        let connectivity_map_url = self
            .store_volume(generated_connectivity_key(&task_label), map.clone())
            .await?;

        reporter.set_step(2);
        reporter
            .report(60.0, "Starting decoding of connectivity map...")
            .await;
        let query = self.stages.decode.mask_query(&map)?;
        let outcome = self
            .stages
            .decode
            .decode(
                &query,
                request.level,
                request.scope,
                &ScaledProgress::new(reporter, 60.0, 100.0),
            )
            .await?;
        reporter.report(100.0, "Decoding completed.").await;

        let mut result = to_json(&outcome)?;
        if let Value::Object(fields) = &mut result {
            fields.insert("connectivity_map_url".to_owned(), connectivity_map_url.into());
            fields.insert("lesion_mask_url".to_owned(), lesion_mask_url.into());
        }
        Ok(result)
    }

    async fn store_volume(&self, key: String, volume: Volume) -> Result<String, Error> {
        let codec = Arc::clone(&self.codec);
        let bytes = tokio::task::spawn_blocking(move || codec.encode_volume(&volume))
            .await
            .map_err(|err| Error::internal(format!("volume encoding task failed: {err}")))?
            .map_err(map_codec_error)?;
        self.blobs
            .put(&key, bytes)
            .await
            .map_err(map_blob_error)?;
        Ok(self.blobs.public_url(&key))
    }

    async fn record_failure(&self, task_id: TaskId, message: &str) {
        if let Err(err) = self.tasks.fail(task_id, message).await {
            error!(task_id = %task_id, error = %err, "failed to record task failure");
        }
    }
}

fn task_not_found(task_id: TaskId) -> Error {
    Error::not_found(format!("task {task_id} not found"))
        .with_details(json!({ "taskId": task_id.to_string() }))
}

fn to_json(value: &impl serde::Serialize) -> Result<Value, Error> {
    serde_json::to_value(value)
        .map_err(|err| Error::internal(format!("failed to serialise task result: {err}")))
}
