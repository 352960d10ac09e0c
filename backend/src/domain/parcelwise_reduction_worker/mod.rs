//! Post-commit worker that reduces volumetric uploads to parcelwise rows.
//!
//! Each job loads the committed file's blob, detects its template space,
//! reduces it over the configured reduction atlas, stores the dense vector as
//! a `.npy` artifact, and writes the non-zero parcel rows. The whole job runs
//! under an execution timeout. Any failure is recorded on the source file
//! and never touches the file record itself.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::imaging::{CoordinateSpace, FileKind};
use crate::domain::parcellation::Parcel;
use crate::domain::port_error_mapping::{
    map_blob_error, map_codec_error, map_file_repository_error,
};
use crate::domain::ports::{
    BlobStore, DerivedFileRepository, ParcellationRepository, ParcellationRepositoryError,
    ReductionCommit, ReductionJob, VolumeCodec,
};
use crate::domain::reduction::{
    ReductionAtlas, ResolvedReduction, reduce_by_parcel, resolve_reduction,
};
use crate::domain::storage_keys::derived_artifact_key;
use crate::domain::{Error, FileRecord, IndexStatus, NewFileRecord, content_hash};

mod runtime;

pub use runtime::ParcelwiseReductionPorts;

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParcelwiseReductionConfig {
    /// Upper bound on one job, from blob load to commit.
    pub timeout: Duration,
}

impl Default for ParcelwiseReductionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
        }
    }
}

/// Successful reduction summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionOutcome {
    /// Reduced file.
    pub source_file_id: i64,
    /// Stored `.npy` artifact.
    pub artifact: FileRecord,
    /// Number of non-zero parcel rows written.
    pub parcel_rows: usize,
    /// Template space of the source volume.
    pub coordinate_space: CoordinateSpace,
}

/// Domain-owned parcelwise reduction worker.
pub struct ParcelwiseReductionWorker {
    files: Arc<dyn DerivedFileRepository>,
    parcellations: Arc<dyn ParcellationRepository>,
    blobs: Arc<dyn BlobStore>,
    codec: Arc<dyn VolumeCodec>,
    atlas: Arc<ReductionAtlas>,
    config: ParcelwiseReductionConfig,
}

struct Reduced {
    coordinate_space: CoordinateSpace,
    resolved: ResolvedReduction,
    encoded: Vec<u8>,
}

impl ParcelwiseReductionWorker {
    /// Build a worker reducing over `atlas`.
    pub fn new(
        ports: ParcelwiseReductionPorts,
        atlas: Arc<ReductionAtlas>,
        config: ParcelwiseReductionConfig,
    ) -> Self {
        Self {
            files: ports.files,
            parcellations: ports.parcellations,
            blobs: ports.blobs,
            codec: ports.codec,
            atlas,
            config,
        }
    }

    /// Execute one reduction job.
    ///
    /// Returns `Ok(None)` when the file needs no reduction. Errors are
    /// recorded on the file's index status before being returned.
    pub async fn process_job(&self, job: ReductionJob) -> Result<Option<ReductionOutcome>, Error> {
        let record = self
            .files
            .find(job.file_id)
            .await
            .map_err(map_file_repository_error)?
            .ok_or_else(|| Error::not_found(format!("file {} not found", job.file_id)))?;
        if record.is_derived_artifact() || !record.filetype.is_volumetric() {
            return Ok(None);
        }

        let result = match tokio::time::timeout(self.config.timeout, self.reduce(&record)).await {
            Ok(result) => result,
            Err(_) => Err(Error::service_unavailable(format!(
                "parcelwise reduction timed out after {}s",
                self.config.timeout.as_secs()
            ))),
        };

        match result {
            Ok(outcome) => {
                info!(
                    file_id = record.id,
                    artifact_id = outcome.artifact.id,
                    rows = outcome.parcel_rows,
                    space = outcome.coordinate_space.as_str(),
                    "parcelwise reduction committed"
                );
                Ok(Some(outcome))
            }
            Err(error) => {
                warn!(file_id = record.id, error = %error, "parcelwise reduction failed");
                if let Err(err) = self
                    .files
                    .set_index_status(record.id, IndexStatus::Failed, Some(error.to_string()))
                    .await
                {
                    warn!(file_id = record.id, error = %err, "failed to record reduction failure");
                }
                Err(error)
            }
        }
    }

    async fn reduce(&self, record: &FileRecord) -> Result<ReductionOutcome, Error> {
        let parcellation_name = self.atlas.parcellation_name();
        let parcellation = self
            .parcellations
            .find_by_name(parcellation_name)
            .await
            .map_err(map_parcellation_error)?
            .ok_or_else(|| {
                Error::internal(format!(
                    "reduction parcellation {parcellation_name} is not registered"
                ))
            })?;
        let parcels = self
            .parcellations
            .parcels(parcellation.id)
            .await
            .map_err(map_parcellation_error)?;
        let bytes = self
            .blobs
            .get(&record.path)
            .await
            .map_err(map_blob_error)?;

        let reduced = self.reduce_blocking(bytes, record, parcels).await?;
        if !reduced.resolved.unknown_labels.is_empty() {
            return Err(Error::internal(format!(
                "atlas labels {:?} have no parcel in {parcellation_name}",
                reduced.resolved.unknown_labels
            )));
        }

        let sequence = match record.descriptor.sequence_key() {
            Some(key) => Some(
                self.files
                    .next_sequence(&key)
                    .await
                    .map_err(map_file_repository_error)?,
            ),
            None => None,
        };
        let artifact_path =
            derived_artifact_key(&record.path, &record.filetype, parcellation_name, sequence);
        let commit = ReductionCommit {
            source_file_id: record.id,
            coordinate_space: reduced.coordinate_space,
            artifact: NewFileRecord {
                filetype: FileKind::Npy,
                path: artifact_path.clone(),
                content_hash: content_hash(&reduced.encoded),
                parcellation_id: Some(parcellation.id),
                descriptor: record.descriptor.clone(),
                coordinate_space: Some(reduced.coordinate_space),
                source_file_id: Some(record.id),
                index_status: IndexStatus::NotApplicable,
            },
            values: reduced.resolved.sparse,
        };

        self.blobs
            .put(&artifact_path, reduced.encoded)
            .await
            .map_err(map_blob_error)?;
        let committed = match self.files.commit_reduction(&commit).await {
            Ok(committed) => committed,
            Err(err) => {
                if sequence.is_some() {
                    self.discard_blob(&artifact_path).await;
                }
                return Err(map_file_repository_error(err));
            }
        };
        for path in committed
            .superseded_paths
            .iter()
            .filter(|path| **path != artifact_path)
        {
            self.discard_blob(path).await;
        }

        Ok(ReductionOutcome {
            source_file_id: record.id,
            artifact: committed.artifact,
            parcel_rows: commit.values.len(),
            coordinate_space: commit.coordinate_space,
        })
    }

    async fn reduce_blocking(
        &self,
        bytes: Vec<u8>,
        record: &FileRecord,
        parcels: Vec<Parcel>,
    ) -> Result<Reduced, Error> {
        let codec = Arc::clone(&self.codec);
        let atlas = Arc::clone(&self.atlas);
        let kind = record.filetype.clone();
        let strategy = record.category().reduction_strategy();

        tokio::task::spawn_blocking(move || {
            let volume = codec.decode_volume(&bytes, &kind).map_err(map_codec_error)?;
            let coordinate_space = CoordinateSpace::detect(volume.shape(), volume.affine());
            let reduced = reduce_by_parcel(&volume, &atlas, strategy)
                .map_err(|err| Error::invalid_request(err.to_string()))?;
            let resolved = resolve_reduction(&reduced, &parcels);
            let encoded = codec
                .encode_vector(&resolved.dense)
                .map_err(map_codec_error)?;
            Ok(Reduced {
                coordinate_space,
                resolved,
                encoded,
            })
        })
        .await
        .map_err(|err| Error::internal(format!("reduction task failed: {err}")))?
    }

    async fn discard_blob(&self, path: &str) {
        if let Err(err) = self.blobs.delete(path).await {
            warn!(path, error = %err, "failed to delete artifact blob");
        }
    }
}

fn map_parcellation_error(error: ParcellationRepositoryError) -> Error {
    match error {
        ParcellationRepositoryError::Connection { message } => Error::service_unavailable(message),
        ParcellationRepositoryError::Query { message }
        | ParcellationRepositoryError::Conflict { message } => Error::internal(message),
    }
}
