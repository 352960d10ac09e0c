//! Mapping from port errors to domain errors.
//!
//! Connection failures surface as `service_unavailable`, adapter bugs as
//! `internal`, and caller mistakes keep their client-facing code.

use serde_json::json;

use super::Error;
use super::ports::{
    BlobStoreError, ConnectivityMapperError, DecodeCorpusRepositoryError,
    DerivedFileRepositoryError, PointQueryRepositoryError, ReductionQueueError, TaskStoreError,
    VolumeCodecError,
};

pub(crate) fn map_file_repository_error(error: DerivedFileRepositoryError) -> Error {
    match error {
        DerivedFileRepositoryError::Connection { message } => Error::service_unavailable(message),
        DerivedFileRepositoryError::Query { message } => Error::internal(message),
        DerivedFileRepositoryError::Conflict { message } => Error::conflict(message),
        DerivedFileRepositoryError::NotFound { file_id } => {
            Error::not_found(format!("file {file_id} not found"))
                .with_details(json!({ "fileId": file_id }))
        }
    }
}

pub(crate) fn map_blob_error(error: BlobStoreError) -> Error {
    match error {
        BlobStoreError::NotFound { key } => {
            Error::not_found(format!("blob not found: {key}")).with_details(json!({ "key": key }))
        }
        BlobStoreError::InvalidKey { key } => Error::internal(format!("invalid blob key: {key}")),
        BlobStoreError::Io { message } => Error::service_unavailable(message),
    }
}

pub(crate) fn map_queue_error(error: ReductionQueueError) -> Error {
    Error::service_unavailable(error.to_string())
}

pub(crate) fn map_codec_error(error: VolumeCodecError) -> Error {
    match error {
        VolumeCodecError::Unsupported { .. } | VolumeCodecError::Malformed { .. } => {
            Error::invalid_request(error.to_string())
        }
        VolumeCodecError::Encode { message } => Error::internal(message),
    }
}

pub(crate) fn map_point_query_error(error: PointQueryRepositoryError) -> Error {
    match error {
        PointQueryRepositoryError::Connection { message } => Error::service_unavailable(message),
        PointQueryRepositoryError::Query { message } => Error::internal(message),
    }
}

pub(crate) fn map_corpus_error(error: DecodeCorpusRepositoryError) -> Error {
    match error {
        DecodeCorpusRepositoryError::Connection { message } => Error::service_unavailable(message),
        DecodeCorpusRepositoryError::Query { message } => Error::internal(message),
    }
}

pub(crate) fn map_mapper_error(error: ConnectivityMapperError) -> Error {
    match error {
        ConnectivityMapperError::MissingChunk { .. } => Error::internal(error.to_string()),
        ConnectivityMapperError::Failed { message } => Error::service_unavailable(message),
    }
}

pub(crate) fn map_task_store_error(error: TaskStoreError) -> Error {
    match error {
        TaskStoreError::Connection { message } => Error::service_unavailable(message),
        TaskStoreError::Query { message } => Error::internal(message),
        TaskStoreError::NotFound { task_id } => {
            Error::not_found(format!("task {task_id} not found"))
        }
    }
}
