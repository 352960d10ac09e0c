//! Domain port describing post-commit reduction dispatch.
use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by the reduction queue adapter.
    pub enum ReductionQueueError {
        /// Queue infrastructure is unavailable.
        Unavailable { message: String } => "reduction queue is unavailable: {message}",
        /// The job could not be accepted.
        Rejected { message: String } => "reduction job was rejected: {message}",
    }
}

/// One parcelwise reduction to run for a committed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionJob {
    /// File to reduce.
    pub file_id: i64,
}

/// Port for scheduling reductions after the ingest transaction commits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReductionQueue: Send + Sync {
    /// Enqueue a job for a worker.
    async fn enqueue(&self, job: ReductionJob) -> Result<(), ReductionQueueError>;

    /// Enqueue a job from a backlog, waiting for capacity where the adapter
    /// is bounded.
    async fn enqueue_backlog(&self, job: ReductionJob) -> Result<(), ReductionQueueError> {
        self.enqueue(job).await
    }
}
