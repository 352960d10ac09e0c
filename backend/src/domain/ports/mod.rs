//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod blob_store;
mod connectivity_mapper;
mod decode_corpus_repository;
mod derived_file_repository;
mod parcellation_repository;
mod point_query_repository;
mod reduction_queue;
mod task_store;
mod volume_codec;

#[cfg(test)]
pub use blob_store::MockBlobStore;
pub use blob_store::{BlobStore, BlobStoreError};
#[cfg(test)]
pub use connectivity_mapper::MockConnectivityMapper;
pub use connectivity_mapper::{ChunkRequest, ConnectivityMapper, ConnectivityMapperError};
#[cfg(test)]
pub use decode_corpus_repository::MockDecodeCorpusRepository;
pub use decode_corpus_repository::{
    CorpusSubject, DecodeCorpusRepository, DecodeCorpusRepositoryError, TaxonMembership,
};
#[cfg(test)]
pub use derived_file_repository::MockDerivedFileRepository;
pub use derived_file_repository::{
    CommittedReduction, DerivedFileRepository, DerivedFileRepositoryError, ReductionCommit,
    ReplacedFile,
};
#[cfg(test)]
pub use parcellation_repository::MockParcellationRepository;
pub use parcellation_repository::{ParcellationRepository, ParcellationRepositoryError};
#[cfg(test)]
pub use point_query_repository::MockPointQueryRepository;
pub use point_query_repository::{
    OwnedParcelValue, PointQueryRepository, PointQueryRepositoryError,
};
#[cfg(test)]
pub use reduction_queue::MockReductionQueue;
pub use reduction_queue::{ReductionJob, ReductionQueue, ReductionQueueError};
#[cfg(test)]
pub use task_store::MockTaskStore;
pub use task_store::{TaskStore, TaskStoreError};
#[cfg(test)]
pub use volume_codec::MockVolumeCodec;
pub use volume_codec::{VolumeCodec, VolumeCodecError};
