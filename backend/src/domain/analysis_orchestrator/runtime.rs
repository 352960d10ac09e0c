//! Port and stage bundles for the analysis orchestrator.

use std::sync::Arc;

use crate::domain::connectivity_mapping::ConnectivityMappingService;
use crate::domain::decode::DecodeService;
use crate::domain::ports::{BlobStore, TaskStore, VolumeCodec};

/// Port bundle required by the orchestrator.
pub struct AnalysisOrchestratorPorts {
    /// Durable task state.
    pub tasks: Arc<dyn TaskStore>,
    /// Storage for generated analysis artifacts.
    pub blobs: Arc<dyn BlobStore>,
    /// Encoder for generated volumes.
    pub codec: Arc<dyn VolumeCodec>,
}

impl AnalysisOrchestratorPorts {
    /// Build a strongly-typed port bundle.
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        blobs: Arc<dyn BlobStore>,
        codec: Arc<dyn VolumeCodec>,
    ) -> Self {
        Self {
            tasks,
            blobs,
            codec,
        }
    }
}

/// Workflow stages the orchestrator sequences.
#[derive(Clone)]
pub struct AnalysisStages {
    /// Correlation decode.
    pub decode: DecodeService,
    /// Chunked connectivity mapping.
    pub mapping: ConnectivityMappingService,
}

impl AnalysisStages {
    /// Pair the decode and mapping stages.
    pub fn new(decode: DecodeService, mapping: ConnectivityMappingService) -> Self {
        Self { decode, mapping }
    }
}
