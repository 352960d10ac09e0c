//! Port bundle for the parcelwise reduction worker.

use std::sync::Arc;

use crate::domain::ports::{BlobStore, DerivedFileRepository, ParcellationRepository, VolumeCodec};

/// Port bundle required by the reduction worker.
pub struct ParcelwiseReductionPorts {
    /// Derived file persistence adapter.
    pub files: Arc<dyn DerivedFileRepository>,
    /// Parcellation lookup adapter.
    pub parcellations: Arc<dyn ParcellationRepository>,
    /// Blob store adapter.
    pub blobs: Arc<dyn BlobStore>,
    /// Imaging codec.
    pub codec: Arc<dyn VolumeCodec>,
}

impl ParcelwiseReductionPorts {
    /// Build a strongly-typed worker port bundle.
    pub fn new(
        files: Arc<dyn DerivedFileRepository>,
        parcellations: Arc<dyn ParcellationRepository>,
        blobs: Arc<dyn BlobStore>,
        codec: Arc<dyn VolumeCodec>,
    ) -> Self {
        Self {
            files,
            parcellations,
            blobs,
            codec,
        }
    }
}
