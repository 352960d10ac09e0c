//! Fully wired in-memory corpus.
//!
//! Every service runs against the in-memory adapters, so HTTP and
//! integration tests exercise the real domain code end to end. Reductions
//! are queued on a [`RecordingReductionQueue`] and run on demand through
//! [`InMemoryCorpus::run_reductions`].

use std::sync::Arc;

use async_trait::async_trait;

use super::fixtures::{toy_mask, toy_reduction_atlas, toy_volume};
use super::{
    InMemoryBlobStore, InMemoryCatalog, InMemoryTaskStore, JsonVolumeCodec, MutableClock,
    RecordingReductionQueue,
};
use crate::domain::analysis_orchestrator::{
    AnalysisOrchestrator, AnalysisOrchestratorPorts, AnalysisStages, OrchestratorConfig,
};
use crate::domain::connectivity_mapping::{ConnectivityMappingConfig, ConnectivityMappingService};
use crate::domain::decode::{DecodeConfig, DecodeService};
use crate::domain::ingestion::{IngestionConfig, IngestionService};
use crate::domain::parcellation::ParcellationRegistryService;
use crate::domain::parcelwise_reduction_worker::{
    ParcelwiseReductionConfig, ParcelwiseReductionPorts, ParcelwiseReductionWorker,
    ReductionOutcome,
};
use crate::domain::point_query::PointQueryService;
use crate::domain::imaging::FileKind;
use crate::domain::ports::{
    BlobStore, ChunkRequest, ConnectivityMapper, ConnectivityMapperError, DerivedFileRepository,
};
use crate::domain::{Error, FileDescriptor, IndexStatus, NewFileRecord};

/// Mapper answering every chunk with the same masked map.
pub struct ConstantMapper(pub Vec<f64>);

#[async_trait]
impl ConnectivityMapper for ConstantMapper {
    async fn chunk_map(&self, _request: &ChunkRequest) -> Result<Vec<f64>, ConnectivityMapperError> {
        Ok(self.0.clone())
    }
}

/// Services and adapters of one in-memory corpus on the toy grid.
pub struct InMemoryCorpus {
    pub catalog: Arc<InMemoryCatalog>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub tasks: Arc<InMemoryTaskStore>,
    pub queue: Arc<RecordingReductionQueue>,
    pub registry: ParcellationRegistryService,
    pub ingestion: IngestionService,
    pub worker: Arc<ParcelwiseReductionWorker>,
    pub point_query: PointQueryService,
    pub orchestrator: AnalysisOrchestrator,
}

impl InMemoryCorpus {
    /// Corpus whose connectivity mapper returns `chunk_map` for every chunk.
    pub fn new(chunk_map: Vec<f64>) -> Self {
        Self::with_mapper(Arc::new(ConstantMapper(chunk_map)))
    }

    /// Corpus backed by `mapper`.
    pub fn with_mapper(mapper: Arc<dyn ConnectivityMapper>) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let tasks = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(RecordingReductionQueue::new());
        let codec = Arc::new(JsonVolumeCodec);
        let mask = Arc::new(toy_mask());
        let atlas = Arc::new(toy_reduction_atlas());

        let registry = ParcellationRegistryService::new(catalog.clone(), Arc::clone(&mask));
        let ingestion = IngestionService::new(
            catalog.clone(),
            blobs.clone(),
            queue.clone(),
            IngestionConfig::default(),
        );
        let worker = Arc::new(ParcelwiseReductionWorker::new(
            ParcelwiseReductionPorts::new(
                catalog.clone(),
                catalog.clone(),
                blobs.clone(),
                codec.clone(),
            ),
            Arc::clone(&atlas),
            ParcelwiseReductionConfig::default(),
        ));
        let point_query = PointQueryService::new(catalog.clone());
        let decode = DecodeService::new(
            catalog.clone(),
            blobs.clone(),
            codec.clone(),
            Arc::clone(&mask),
            DecodeConfig::default(),
        );
        let mapping = ConnectivityMappingService::new(
            mapper,
            atlas,
            mask,
            ConnectivityMappingConfig::default(),
        );
        let orchestrator = AnalysisOrchestrator::new(
            AnalysisOrchestratorPorts::new(tasks.clone(), blobs.clone(), codec),
            AnalysisStages::new(decode, mapping),
            Arc::new(MutableClock::fixed()),
            OrchestratorConfig::default(),
        );

        Self {
            catalog,
            blobs,
            tasks,
            queue,
            registry,
            ingestion,
            worker,
            point_query,
            orchestrator,
        }
    }

    /// Store a connectivity map for `subject_id` and link the subject to
    /// `symptom`, which must already exist in the taxonomy.
    pub async fn add_connectivity_subject(&self, subject_id: i64, values: [f32; 2], symptom: &str) {
        let path = format!("subjects/sub-{subject_id}/connectivity/map.nii.gz");
        if let Err(err) = self
            .blobs
            .put(&path, JsonVolumeCodec::payload(&toy_volume(values)))
            .await
        {
            panic!("connectivity blob stored: {err}");
        }
        let record = NewFileRecord {
            filetype: FileKind::NiftiGz,
            path,
            content_hash: format!("connectivity-{subject_id}"),
            parcellation_id: None,
            descriptor: FileDescriptor::Connectivity {
                subject_id,
                connectome: "toy".to_owned(),
                statistic: "t".to_owned(),
            },
            coordinate_space: None,
            source_file_id: None,
            index_status: IndexStatus::Pending,
        };
        if let Err(err) = self.catalog.insert(&record).await {
            panic!("connectivity file stored: {err}");
        }
        self.catalog.add_subject(subject_id, false);
        self.catalog.assign_symptom(subject_id, symptom);
    }

    /// Run every queued reduction in submission order.
    pub async fn run_reductions(&self) -> Vec<Result<Option<ReductionOutcome>, Error>> {
        let mut outcomes = Vec::new();
        for job in self.queue.drain() {
            outcomes.push(self.worker.process_job(job).await);
        }
        outcomes
    }
}
