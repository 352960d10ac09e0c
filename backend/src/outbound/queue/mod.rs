//! In-process reduction queues.
//!
//! [`ChannelReductionQueue`] hands jobs to a bounded tokio channel drained by
//! [`spawn_reduction_consumer`]. [`InlineReductionQueue`] runs the job before
//! `enqueue` returns, for one-shot command-line ingestion.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::parcelwise_reduction_worker::ParcelwiseReductionWorker;
use crate::domain::ports::{ReductionJob, ReductionQueue, ReductionQueueError};

/// Receiving half of a [`ChannelReductionQueue`].
pub struct ReductionJobReceiver {
    inner: mpsc::Receiver<ReductionJob>,
}

/// Bounded channel-backed reduction queue.
#[derive(Clone)]
pub struct ChannelReductionQueue {
    sender: mpsc::Sender<ReductionJob>,
}

impl ChannelReductionQueue {
    /// Queue holding at most `capacity` waiting jobs, plus its receiver.
    pub fn channel(capacity: usize) -> (Self, ReductionJobReceiver) {
        let (sender, inner) = mpsc::channel(capacity.max(1));
        (Self { sender }, ReductionJobReceiver { inner })
    }
}

#[async_trait]
impl ReductionQueue for ChannelReductionQueue {
    async fn enqueue(&self, job: ReductionJob) -> Result<(), ReductionQueueError> {
        self.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(job) => ReductionQueueError::rejected(format!(
                "queue is full; file {} was not scheduled",
                job.file_id
            )),
            mpsc::error::TrySendError::Closed(_) => {
                ReductionQueueError::unavailable("reduction consumer has stopped")
            }
        })?;
        debug!(file_id = job.file_id, "reduction job queued");
        Ok(())
    }

    async fn enqueue_backlog(&self, job: ReductionJob) -> Result<(), ReductionQueueError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| ReductionQueueError::unavailable("reduction consumer has stopped"))?;
        debug!(file_id = job.file_id, "backlog reduction job queued");
        Ok(())
    }
}

/// Drain `receiver`, running up to `concurrency` jobs at once.
///
/// The returned task finishes once every sender is dropped and the queued
/// jobs have been processed.
pub fn spawn_reduction_consumer(
    receiver: ReductionJobReceiver,
    worker: Arc<ParcelwiseReductionWorker>,
    concurrency: usize,
) -> JoinHandle<()> {
    let mut inner = receiver.inner;
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    tokio::spawn(async move {
        let mut running = Vec::new();
        while let Some(job) = inner.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(&worker);
            running.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(error) = worker.process_job(job).await {
                    warn!(file_id = job.file_id, %error, "reduction job failed");
                }
            }));
            running.retain(|handle: &JoinHandle<()>| !handle.is_finished());
        }
        for handle in running {
            if let Err(error) = handle.await {
                warn!(%error, "reduction task panicked");
            }
        }
        info!("reduction consumer stopped");
    })
}

/// Queue that reduces each job before `enqueue` returns.
///
/// Reduction failures are recorded on the file by the worker, so they are
/// logged here rather than surfaced to the ingesting caller.
#[derive(Clone)]
pub struct InlineReductionQueue {
    worker: Arc<ParcelwiseReductionWorker>,
}

impl InlineReductionQueue {
    /// Run jobs on `worker`.
    pub fn new(worker: Arc<ParcelwiseReductionWorker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl ReductionQueue for InlineReductionQueue {
    async fn enqueue(&self, job: ReductionJob) -> Result<(), ReductionQueueError> {
        if let Err(error) = self.worker.process_job(job).await {
            warn!(file_id = job.file_id, %error, "inline reduction failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parcelwise_reduction_worker::{
        ParcelwiseReductionConfig, ParcelwiseReductionPorts,
    };
    use crate::test_support::fixtures::toy_reduction_atlas;
    use crate::test_support::{InMemoryBlobStore, InMemoryCatalog, JsonVolumeCodec};
    use rstest::rstest;

    fn worker() -> Arc<ParcelwiseReductionWorker> {
        let catalog = Arc::new(InMemoryCatalog::new());
        let ports = ParcelwiseReductionPorts::new(
            catalog.clone(),
            catalog,
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(JsonVolumeCodec),
        );
        Arc::new(ParcelwiseReductionWorker::new(
            ports,
            Arc::new(toy_reduction_atlas()),
            ParcelwiseReductionConfig::default(),
        ))
    }

    #[rstest]
    #[tokio::test]
    async fn full_queues_reject_new_jobs() {
        let (queue, _receiver) = ChannelReductionQueue::channel(1);
        queue.enqueue(ReductionJob { file_id: 1 }).await.expect("first job");

        let error = queue
            .enqueue(ReductionJob { file_id: 2 })
            .await
            .expect_err("queue full");

        assert!(matches!(error, ReductionQueueError::Rejected { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn backlog_jobs_wait_for_capacity() {
        let (queue, mut receiver) = ChannelReductionQueue::channel(1);
        queue.enqueue(ReductionJob { file_id: 1 }).await.expect("first job");
        let backlog = queue.clone();
        let waiting =
            tokio::spawn(async move { backlog.enqueue_backlog(ReductionJob { file_id: 2 }).await });

        assert_eq!(receiver.inner.recv().await, Some(ReductionJob { file_id: 1 }));
        waiting
            .await
            .expect("backlog task joined")
            .expect("queued once capacity frees up");
        assert_eq!(receiver.inner.recv().await, Some(ReductionJob { file_id: 2 }));
    }

    #[rstest]
    #[tokio::test]
    async fn closed_queues_are_unavailable() {
        let (queue, receiver) = ChannelReductionQueue::channel(4);
        drop(receiver);

        let error = queue
            .enqueue(ReductionJob { file_id: 1 })
            .await
            .expect_err("closed");

        assert_eq!(
            error,
            ReductionQueueError::unavailable("reduction consumer has stopped")
        );
    }

    #[rstest]
    #[tokio::test]
    async fn consumer_survives_failed_jobs_and_stops_when_senders_drop() {
        let (queue, receiver) = ChannelReductionQueue::channel(4);
        let handle = spawn_reduction_consumer(receiver, worker(), 2);

        queue.enqueue(ReductionJob { file_id: 404 }).await.expect("queued");
        queue.enqueue(ReductionJob { file_id: 405 }).await.expect("queued");
        drop(queue);

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("consumer stops")
            .expect("consumer did not panic");
    }

    #[rstest]
    #[tokio::test]
    async fn inline_queue_swallows_reduction_failures() {
        let queue = InlineReductionQueue::new(worker());
        queue
            .enqueue(ReductionJob { file_id: 404 })
            .await
            .expect("failures are recorded, not returned");
    }
}
