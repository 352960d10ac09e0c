//! Driven port for derived file records and their parcelwise rows.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::imaging::CoordinateSpace;
use crate::domain::reduction::ParcelValue;
use crate::domain::{FileRecord, IndexStatus, NewFileRecord};

define_port_error! {
    /// Errors raised while reading or writing derived files.
    pub enum DerivedFileRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } =>
            "derived file repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } =>
            "derived file repository query failed: {message}",
        /// A file with the same storage path already exists.
        Conflict { message: String } =>
            "derived file conflict: {message}",
        /// The referenced file does not exist.
        NotFound { file_id: i64 } =>
            "derived file {file_id} not found",
    }
}

/// Outcome of replacing a file record during override ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacedFile {
    /// Newly inserted record.
    pub record: FileRecord,
    /// Blob keys of the deleted record and its derived artifacts.
    pub removed_paths: Vec<String>,
}

/// Everything a completed reduction writes in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionCommit {
    /// File that was reduced.
    pub source_file_id: i64,
    /// Template space detected from the source volume.
    pub coordinate_space: CoordinateSpace,
    /// Parcelwise artifact record.
    pub artifact: NewFileRecord,
    /// Non-zero parcel values attached to the artifact.
    pub values: Vec<ParcelValue>,
}

/// Outcome of a committed reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedReduction {
    /// Inserted artifact record.
    pub artifact: FileRecord,
    /// Blob keys of earlier artifacts of the same source that were removed.
    pub superseded_paths: Vec<String>,
}

/// Port for derived file persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DerivedFileRepository: Send + Sync {
    /// Find an uploaded (non-artifact) file by content hash or storage path.
    async fn find_duplicate(
        &self,
        content_hash: &str,
        path: Option<String>,
    ) -> Result<Option<FileRecord>, DerivedFileRepositoryError>;

    /// Lookup a file by id.
    async fn find(&self, file_id: i64) -> Result<Option<FileRecord>, DerivedFileRepositoryError>;

    /// Allocate the next sequence number for `key`.
    ///
    /// Implementations must serialise concurrent callers on the same key.
    async fn next_sequence(&self, key: &str) -> Result<i64, DerivedFileRepositoryError>;

    /// Insert a new file record.
    async fn insert(&self, file: &NewFileRecord) -> Result<FileRecord, DerivedFileRepositoryError>;

    /// Delete `existing_id` with its parcelwise rows and artifacts, then
    /// insert `file`, in one transaction.
    async fn replace(
        &self,
        existing_id: i64,
        file: &NewFileRecord,
    ) -> Result<ReplacedFile, DerivedFileRepositoryError>;

    /// Record a completed reduction in one transaction.
    ///
    /// Implementations must update the source's coordinate space and mark
    /// it indexed, remove earlier artifacts of the same source, then insert
    /// the artifact and its parcelwise rows.
    async fn commit_reduction(
        &self,
        commit: &ReductionCommit,
    ) -> Result<CommittedReduction, DerivedFileRepositoryError>;

    /// Ids of uploaded files still waiting for a reduction, oldest first.
    async fn pending_reductions(&self) -> Result<Vec<i64>, DerivedFileRepositoryError>;

    /// Update a file's reduction state.
    async fn set_index_status(
        &self,
        file_id: i64,
        status: IndexStatus,
        error: Option<String>,
    ) -> Result<(), DerivedFileRepositoryError>;
}
