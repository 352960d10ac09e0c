//! Test utilities for the backend crate.
//!
//! This module provides shared helpers for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is compiled for unit tests and when
//! the `test-support` feature is enabled.

pub mod catalog;
pub mod clock;
pub mod codec;
pub mod corpus;
pub mod fixtures;
pub mod memory;

pub use catalog::InMemoryCatalog;
pub use clock::MutableClock;
pub use codec::JsonVolumeCodec;
pub use corpus::{ConstantMapper, InMemoryCorpus};
pub use memory::{InMemoryBlobStore, InMemoryTaskStore, RecordingReductionQueue};

use std::time::Duration;

use crate::domain::TaskStatus;
use crate::domain::analysis_orchestrator::AnalysisOrchestrator;
use crate::domain::TaskId;

/// Poll `task_id` until it reaches a terminal state, returning every
/// distinct status observed on the way.
///
/// # Panics
/// Panics if the task does not finish within `limit`.
pub async fn poll_until_terminal(
    orchestrator: &AnalysisOrchestrator,
    task_id: TaskId,
    limit: Duration,
) -> Vec<TaskStatus> {
    let deadline = tokio::time::Instant::now() + limit;
    let mut seen: Vec<TaskStatus> = Vec::new();
    loop {
        let status = match orchestrator.status(task_id).await {
            Ok(status) => status,
            Err(err) => panic!("status lookup failed: {err}"),
        };
        let finished = status.state.is_terminal();
        if seen.last() != Some(&status) {
            seen.push(status);
        }
        if finished {
            return seen;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("task {task_id} did not finish within {limit:?}");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
