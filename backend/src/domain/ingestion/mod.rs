//! Content-addressed ingestion of corpus files.
//!
//! The service hashes and stores uploads, records them, and hands volumetric
//! files to the reduction queue once the insert has committed. Reduction
//! failures never roll the file back; they are recorded on the file's index
//! status and can be re-run through [`IngestionService::reindex`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::imaging::FileKind;
use crate::domain::port_error_mapping::{
    map_blob_error, map_file_repository_error, map_queue_error,
};
use crate::domain::ports::{BlobStore, DerivedFileRepository, ReductionJob, ReductionQueue};
use crate::domain::storage_keys::upload_key;
use crate::domain::{
    Error, FileDescriptor, FileRecord, IndexStatus, NewFileRecord, content_hash,
};

/// Ingestion limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionConfig {
    /// Largest accepted upload.
    pub max_upload_bytes: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

/// One upload to ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Raw file bytes.
    pub bytes: Vec<u8>,
    /// Filename as declared by the uploader.
    pub filename: String,
    /// Owner linkage and category tags.
    pub descriptor: FileDescriptor,
    /// Replace an existing file with the same hash or path.
    pub override_existing: bool,
}

/// Result of [`IngestionService::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A new file was stored.
    Stored(FileRecord),
    /// An existing file was replaced.
    Replaced {
        /// Newly stored record.
        record: FileRecord,
        /// Id of the record that was removed.
        replaced_file_id: i64,
    },
    /// Identical content or path was already stored.
    DuplicateSkipped(FileRecord),
}

impl IngestOutcome {
    /// Record the outcome refers to.
    pub fn record(&self) -> &FileRecord {
        match self {
            Self::Stored(record)
            | Self::Replaced { record, .. }
            | Self::DuplicateSkipped(record) => record,
        }
    }
}

/// Result of [`IngestionService::resume_pending_reductions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingRecovery {
    /// Files handed back to the reduction queue.
    pub requeued: usize,
    /// Files that could not be queued and were marked failed.
    pub failed: usize,
}

/// Hashes, stores, and records uploads.
#[derive(Clone)]
pub struct IngestionService {
    files: Arc<dyn DerivedFileRepository>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn ReductionQueue>,
    config: IngestionConfig,
}

impl IngestionService {
    /// Create the service.
    pub fn new(
        files: Arc<dyn DerivedFileRepository>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn ReductionQueue>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            files,
            blobs,
            queue,
            config,
        }
    }

    /// Ingest one upload.
    ///
    /// Identical bytes, or a group-level map at an occupied path, return the
    /// stored record unless `override_existing` is set. With override, the
    /// old record, its parcelwise rows, and its blobs are removed once the
    /// new record has committed.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, Error> {
        let kind = self.validate(&request)?;
        let hash = content_hash(&request.bytes);
        let fixed_path = request
            .descriptor
            .sequence_key()
            .is_none()
            .then(|| upload_key(&request.descriptor, None, &kind));

        let duplicate = self
            .files
            .find_duplicate(&hash, fixed_path.clone())
            .await
            .map_err(map_file_repository_error)?;
        if let Some(existing) = duplicate.as_ref().filter(|_| !request.override_existing) {
            info!(file_id = existing.id, path = %existing.path, "duplicate upload skipped");
            return Ok(IngestOutcome::DuplicateSkipped(existing.clone()));
        }

        let path = match (fixed_path, request.descriptor.sequence_key()) {
            (Some(path), _) => path,
            (None, Some(key)) => {
                let sequence = self
                    .files
                    .next_sequence(&key)
                    .await
                    .map_err(map_file_repository_error)?;
                upload_key(&request.descriptor, Some(sequence), &kind)
            }
            (None, None) => upload_key(&request.descriptor, None, &kind),
        };

        let new_file = NewFileRecord {
            filetype: kind.clone(),
            path: path.clone(),
            content_hash: hash,
            parcellation_id: None,
            descriptor: request.descriptor,
            coordinate_space: None,
            source_file_id: None,
            index_status: IndexStatus::initial_for(&kind),
        };

        self.blobs
            .put(&path, request.bytes)
            .await
            .map_err(map_blob_error)?;

        let outcome = match duplicate {
            None => self.insert(new_file).await?,
            Some(existing) => self.replace(existing, new_file).await?,
        };

        let record = match outcome {
            IngestOutcome::Replaced {
                record,
                replaced_file_id,
            } => IngestOutcome::Replaced {
                record: self.schedule_reduction(record).await,
                replaced_file_id,
            },
            IngestOutcome::Stored(record) => {
                IngestOutcome::Stored(self.schedule_reduction(record).await)
            }
            skipped @ IngestOutcome::DuplicateSkipped(_) => skipped,
        };
        info!(file_id = record.record().id, path = %record.record().path, "file ingested");
        Ok(record)
    }

    /// Re-run the reduction of a stored volumetric file.
    pub async fn reindex(&self, file_id: i64) -> Result<FileRecord, Error> {
        let record = self
            .files
            .find(file_id)
            .await
            .map_err(map_file_repository_error)?
            .ok_or_else(|| Error::not_found(format!("file {file_id} not found")))?;
        if record.is_derived_artifact() || !record.filetype.is_volumetric() {
            return Err(Error::invalid_request(format!(
                "file {file_id} is not a volumetric upload"
            )));
        }

        self.files
            .set_index_status(file_id, IndexStatus::Pending, None)
            .await
            .map_err(map_file_repository_error)?;
        if let Err(err) = self.queue.enqueue(ReductionJob { file_id }).await {
            let message = err.to_string();
            self.record_schedule_failure(file_id, &message).await;
            return Err(map_queue_error(err));
        }
        Ok(FileRecord {
            index_status: IndexStatus::Pending,
            index_error: None,
            ..record
        })
    }

    /// Re-queue uploads whose reduction was still pending when the previous
    /// process stopped.
    ///
    /// The queue only lives in memory, so a pending file with no job behind
    /// it would otherwise never be indexed. Files that cannot be queued are
    /// marked failed and stay re-runnable through [`Self::reindex`].
    pub async fn resume_pending_reductions(&self) -> Result<PendingRecovery, Error> {
        let pending = self
            .files
            .pending_reductions()
            .await
            .map_err(map_file_repository_error)?;
        let mut recovery = PendingRecovery::default();
        for file_id in pending {
            match self.queue.enqueue_backlog(ReductionJob { file_id }).await {
                Ok(()) => recovery.requeued += 1,
                Err(err) => {
                    self.record_schedule_failure(file_id, &err.to_string()).await;
                    recovery.failed += 1;
                }
            }
        }
        if recovery != PendingRecovery::default() {
            info!(
                requeued = recovery.requeued,
                failed = recovery.failed,
                "pending reductions resumed"
            );
        }
        Ok(recovery)
    }

    fn validate(&self, request: &IngestRequest) -> Result<FileKind, Error> {
        if request.bytes.is_empty() {
            return Err(Error::invalid_request("upload is empty"));
        }
        if request.bytes.len() > self.config.max_upload_bytes {
            return Err(Error::invalid_request(format!(
                "upload of {} bytes exceeds the {} byte limit",
                request.bytes.len(),
                self.config.max_upload_bytes
            )));
        }
        let kind = FileKind::from_filename(&request.filename);
        if !kind.is_known() {
            return Err(Error::invalid_request(format!(
                "unsupported file type: {kind}"
            )));
        }
        if let FileDescriptor::GroupLevelMap { taxon, .. } = &request.descriptor {
            if taxon.trim().is_empty() {
                return Err(Error::invalid_request(
                    "group-level map taxon must not be empty",
                ));
            }
        }
        Ok(kind)
    }

    async fn insert(&self, new_file: NewFileRecord) -> Result<IngestOutcome, Error> {
        match self.files.insert(&new_file).await {
            Ok(record) => Ok(IngestOutcome::Stored(record)),
            Err(err) => {
                self.discard_blob(&new_file.path).await;
                Err(map_file_repository_error(err))
            }
        }
    }

    async fn replace(
        &self,
        existing: FileRecord,
        new_file: NewFileRecord,
    ) -> Result<IngestOutcome, Error> {
        let replaced = match self.files.replace(existing.id, &new_file).await {
            Ok(replaced) => replaced,
            Err(err) => {
                if new_file.path != existing.path {
                    self.discard_blob(&new_file.path).await;
                }
                return Err(map_file_repository_error(err));
            }
        };

        for path in replaced
            .removed_paths
            .iter()
            .filter(|path| **path != new_file.path)
        {
            self.discard_blob(path).await;
        }
        info!(
            old_file_id = existing.id,
            new_file_id = replaced.record.id,
            "file overridden"
        );
        Ok(IngestOutcome::Replaced {
            record: replaced.record,
            replaced_file_id: existing.id,
        })
    }

    async fn schedule_reduction(&self, record: FileRecord) -> FileRecord {
        if record.index_status != IndexStatus::Pending {
            return record;
        }
        match self.queue.enqueue(ReductionJob { file_id: record.id }).await {
            Ok(()) => record,
            Err(err) => {
                let message = err.to_string();
                self.record_schedule_failure(record.id, &message).await;
                FileRecord {
                    index_status: IndexStatus::Failed,
                    index_error: Some(message),
                    ..record
                }
            }
        }
    }

    async fn record_schedule_failure(&self, file_id: i64, message: &str) {
        warn!(file_id, error = %message, "failed to schedule parcelwise reduction");
        if let Err(err) = self
            .files
            .set_index_status(file_id, IndexStatus::Failed, Some(message.to_owned()))
            .await
        {
            warn!(file_id, error = %err, "failed to record reduction scheduling failure");
        }
    }

    async fn discard_blob(&self, path: &str) {
        if let Err(err) = self.blobs.delete(path).await {
            warn!(path, error = %err, "failed to delete blob");
        }
    }
}

#[cfg(test)]
mod tests;
