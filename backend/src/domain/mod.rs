//! Domain primitives, services, and ports.
//!
//! Purpose: hold the imaging corpus model (parcellations, derived files,
//! parcelwise rows, analysis tasks) and the services that ingest, reduce,
//! query, and decode it. Services depend only on the traits in [`ports`];
//! adapters live under `outbound` and `inbound`.
//!
//! Public surface:
//! - Error (alias to `error::Error`): API error response payload.
//! - ErrorCode (alias to `error::ErrorCode`): stable error identifier.
//! - FileDescriptor / FileRecord: derived file linkage and storage record.
//! - TaskId / TaskStatus / TaskOutcome: durable analysis task state.

pub mod analysis_orchestrator;
pub mod connectivity_mapping;
pub mod decode;
pub mod error;
pub mod files;
pub mod imaging;
pub mod ingestion;
pub mod parcellation;
pub mod parcelwise_reduction_worker;
pub mod point_query;
pub mod ports;
pub mod progress;
pub mod reduction;
pub mod storage_keys;
pub mod tasks;
pub mod taxonomy;

mod content_hash;
mod port_error_mapping;

pub use self::content_hash::content_hash;
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::files::{FileDescriptor, FileRecord, FileTags, IndexStatus, NewFileRecord};
pub use self::tasks::{
    ProgressUpdate, TaskId, TaskKind, TaskOutcome, TaskRecord, TaskState, TaskStatus,
};
pub use self::taxonomy::{FileCategory, ReductionStrategy, TaxonomyLevel, VisibilityScope};

/// Convenient API result alias.
///
/// # Examples
/// ```
/// use actix_web::HttpResponse;
/// use lesion_bank::domain::{ApiResult, Error};
///
/// fn handler() -> ApiResult<HttpResponse> {
///     Err(Error::not_found("no such task"))
/// }
/// assert!(handler().is_err());
/// ```
pub type ApiResult<T> = Result<T, Error>;
