//! Progress reporting for long-running analysis stages.
//!
//! Stages receive a `&dyn ProgressReporter` and report their own 0–100
//! progress. Multi-stage workflows wrap the reporter in [`ScaledProgress`] so
//! each stage fills its slice of the overall range.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use super::ports::TaskStore;
use super::{ProgressUpdate, TaskId};

/// Sink for stage progress.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Report `percent` (0 to 100) with a status line.
    async fn report(&self, percent: f64, message: &str);
}

/// Reporter that discards updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressReporter for NoopProgress {
    async fn report(&self, _percent: f64, _message: &str) {}
}

/// Maps a stage's 0–100 progress into `[low, high]` of the parent.
pub struct ScaledProgress<'a> {
    inner: &'a dyn ProgressReporter,
    low: f64,
    high: f64,
}

impl<'a> ScaledProgress<'a> {
    /// Wrap `inner`, mapping 0 to `low` and 100 to `high`.
    pub fn new(inner: &'a dyn ProgressReporter, low: f64, high: f64) -> Self {
        Self { inner, low, high }
    }

    fn scale(&self, percent: f64) -> f64 {
        let clamped = percent.clamp(0.0, 100.0);
        self.low + (self.high - self.low) * clamped / 100.0
    }
}

#[async_trait]
impl ProgressReporter for ScaledProgress<'_> {
    async fn report(&self, percent: f64, message: &str) {
        self.inner.report(self.scale(percent), message).await;
    }
}

struct TaskProgressState {
    percent: i32,
    current_step: i32,
}

/// Reporter persisting progress to the task store.
///
/// Percent values are clamped so a task's reported progress never
/// decreases, independent of the store's own guard. Store failures are
/// logged and do not abort the task.
pub struct TaskProgressReporter {
    tasks: Arc<dyn TaskStore>,
    task_id: TaskId,
    total_steps: i32,
    state: Mutex<TaskProgressState>,
}

impl TaskProgressReporter {
    /// Reporter for `task_id` running `total_steps` stages.
    pub fn new(tasks: Arc<dyn TaskStore>, task_id: TaskId, total_steps: i32) -> Self {
        Self {
            tasks,
            task_id,
            total_steps,
            state: Mutex::new(TaskProgressState {
                percent: 0,
                current_step: 1,
            }),
        }
    }

    /// Set the one-based stage index used in later updates.
    pub fn set_step(&self, step: i32) {
        if let Ok(mut state) = self.state.lock() {
            state.current_step = step.clamp(1, self.total_steps.max(1));
        }
    }

    /// Highest percent reported so far.
    pub fn current_percent(&self) -> i32 {
        self.state.lock().map(|state| state.percent).unwrap_or_default()
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "percent is clamped to 0..=100 before the cast"
    )]
    fn next_update(&self, percent: f64, message: &str) -> Option<ProgressUpdate> {
        let requested = percent.clamp(0.0, 100.0).floor() as i32;
        let mut state = self.state.lock().ok()?;
        state.percent = state.percent.max(requested);
        Some(ProgressUpdate {
            percent: state.percent,
            current_step: state.current_step,
            total_steps: self.total_steps,
            message: message.to_owned(),
        })
    }
}

#[async_trait]
impl ProgressReporter for TaskProgressReporter {
    async fn report(&self, percent: f64, message: &str) {
        let Some(update) = self.next_update(percent, message) else {
            warn!(task_id = %self.task_id, "progress state poisoned; update dropped");
            return;
        };
        if let Err(err) = self.tasks.record_progress(self.task_id, &update).await {
            warn!(task_id = %self.task_id, error = %err, "failed to persist task progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockTaskStore;
    use rstest::rstest;

    struct Recording(Mutex<Vec<(f64, String)>>);

    #[async_trait]
    impl ProgressReporter for Recording {
        async fn report(&self, percent: f64, message: &str) {
            self.0
                .lock()
                .expect("recording lock")
                .push((percent, message.to_owned()));
        }
    }

    #[rstest]
    #[case(0.0, 10.0)]
    #[case(50.0, 30.0)]
    #[case(100.0, 50.0)]
    #[case(140.0, 50.0)]
    #[tokio::test]
    async fn scaled_progress_maps_into_slice(#[case] inner: f64, #[case] expected: f64) {
        let recording = Recording(Mutex::new(Vec::new()));
        ScaledProgress::new(&recording, 10.0, 50.0)
            .report(inner, "step")
            .await;
        let reported = recording.0.lock().expect("recording lock");
        assert_eq!(reported[0].0, expected);
    }

    #[rstest]
    #[tokio::test]
    async fn task_progress_never_decreases() {
        let mut tasks = MockTaskStore::new();
        let persisted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&persisted);
        tasks.expect_record_progress().returning(move |_, update| {
            sink.lock().expect("sink lock").push(update.percent);
            Ok(())
        });
        let reporter = TaskProgressReporter::new(Arc::new(tasks), TaskId::random(), 2);

        for percent in [10.0, 40.0, 25.0, 60.0, 59.5] {
            reporter.report(percent, "working").await;
        }

        let seen = persisted.lock().expect("sink lock").clone();
        assert_eq!(seen, vec![10, 40, 40, 60, 60]);
        assert_eq!(reporter.current_percent(), 60);
    }

    #[rstest]
    #[tokio::test]
    async fn step_is_clamped_to_total() {
        let mut tasks = MockTaskStore::new();
        tasks
            .expect_record_progress()
            .withf(|_, update| update.current_step == 2 && update.total_steps == 2)
            .times(1)
            .returning(|_, _| Ok(()));
        let reporter = TaskProgressReporter::new(Arc::new(tasks), TaskId::random(), 2);

        reporter.set_step(5);
        reporter.report(70.0, "decoding").await;
    }
}
