//! Server construction and adapter wiring.
//!
//! The HTTP binary and the operator CLIs share this module: settings are
//! loaded once, the reference grid is read from disk, and the Diesel,
//! filesystem, and NIfTI adapters are bundled into [`CorpusAdapters`] before
//! the domain services are built on top of them.

pub mod config;
pub mod reference;

pub use config::{PipelineSettings, ServerSettings, SettingsError, load_settings};

use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::dev::{Server, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, HttpServer, web};
use mockable::DefaultClock;
use tracing::info;

use crate::domain::Error;
use crate::domain::analysis_orchestrator::{
    AnalysisOrchestrator, AnalysisOrchestratorPorts, AnalysisStages,
};
use crate::domain::connectivity_mapping::ConnectivityMappingService;
use crate::domain::decode::DecodeService;
use crate::domain::imaging::ReferenceMask;
use crate::domain::ingestion::IngestionService;
use crate::domain::parcellation::ParcellationRegistryService;
use crate::domain::parcelwise_reduction_worker::{
    ParcelwiseReductionPorts, ParcelwiseReductionWorker,
};
use crate::domain::point_query::PointQueryService;
use crate::domain::ports::{BlobStoreError, ReductionQueue};
use crate::domain::reduction::ReductionAtlas;
use crate::inbound::http::configure_api;
use crate::inbound::http::health::{HealthState, live, ready};
use crate::inbound::http::request_span::RequestSpan;
use crate::inbound::http::state::HttpState;
use crate::outbound::imaging::NiftiVolumeCodec;
use crate::outbound::mapper::PrecomputedChunkMapper;
use crate::outbound::persistence::{
    DbPool, DieselDecodeCorpusRepository, DieselDerivedFileRepository,
    DieselParcellationRepository, DieselPointQueryRepository, DieselTaskStore, MigrationError,
    PoolConfig, PoolError, run_pending_migrations,
};
use crate::outbound::storage::FilesystemBlobStore;

/// Failure while starting a binary.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Settings were missing or invalid.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The database pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Schema migrations failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),
    /// The blob root could not be opened.
    #[error(transparent)]
    Blobs(#[from] BlobStoreError),
    /// A reference image could not be loaded.
    #[error("failed to load {path}: {message}")]
    Reference {
        /// File that failed.
        path: String,
        /// Failure detail.
        message: String,
    },
    /// A domain operation during startup failed.
    #[error(transparent)]
    Domain(#[from] Error),
    /// The HTTP listener could not be started.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reference grid shared by registration, reduction, and decoding.
#[derive(Clone)]
pub struct ReferenceData {
    /// Brain mask defining the template grid.
    pub mask: Arc<ReferenceMask>,
    /// Atlas whose parcels drive reduction and connectivity chunking.
    pub reduction_atlas: Arc<ReductionAtlas>,
}

impl ReferenceData {
    /// Load the mask and reduction atlas named in `settings`.
    pub fn load(
        settings: &ServerSettings,
        codec: &NiftiVolumeCodec,
    ) -> Result<Self, StartupError> {
        let mask = reference::load_reference_mask(settings.mask_path()?, codec)?;
        let reduction_atlas = reference::load_reduction_atlas(
            settings.reduction_atlas_path()?,
            settings.reduction_atlas_name(),
            &mask,
            codec,
        )?;
        info!(
            mask_voxels = mask.len(),
            atlas = settings.reduction_atlas_name(),
            "loaded reference grid"
        );
        Ok(Self {
            mask: Arc::new(mask),
            reduction_atlas: Arc::new(reduction_atlas),
        })
    }
}

/// Concrete adapters over one database pool and blob root.
#[derive(Clone)]
pub struct CorpusAdapters {
    pub parcellations: Arc<DieselParcellationRepository>,
    pub files: Arc<DieselDerivedFileRepository>,
    pub point_query: Arc<DieselPointQueryRepository>,
    pub decode_corpus: Arc<DieselDecodeCorpusRepository>,
    pub tasks: Arc<DieselTaskStore>,
    pub blobs: Arc<FilesystemBlobStore>,
    pub codec: Arc<NiftiVolumeCodec>,
}

impl CorpusAdapters {
    /// Apply migrations, open the pool and blob root, and build adapters.
    pub async fn connect(settings: &ServerSettings) -> Result<Self, StartupError> {
        let database_url = settings.database_url()?;
        let applied = run_pending_migrations(database_url).await?;
        if !applied.is_empty() {
            info!(migrations = ?applied, "applied schema migrations");
        }
        let pool = DbPool::new(
            PoolConfig::new(database_url).with_max_size(settings.pool_max_size()),
        )
        .await?;
        let blobs = FilesystemBlobStore::open(settings.blob_root(), settings.public_base_url())?;
        Ok(Self {
            parcellations: Arc::new(DieselParcellationRepository::new(pool.clone())),
            files: Arc::new(DieselDerivedFileRepository::new(pool.clone())),
            point_query: Arc::new(DieselPointQueryRepository::new(pool.clone())),
            decode_corpus: Arc::new(DieselDecodeCorpusRepository::new(pool.clone())),
            tasks: Arc::new(DieselTaskStore::new(pool)),
            blobs: Arc::new(blobs),
            codec: Arc::new(NiftiVolumeCodec::new()),
        })
    }

    /// Atlas registration service.
    pub fn registry(&self, reference_mask: Arc<ReferenceMask>) -> ParcellationRegistryService {
        ParcellationRegistryService::new(self.parcellations.clone(), reference_mask)
    }

    /// Ingestion service handing reductions to `queue`.
    pub fn ingestion(
        &self,
        queue: Arc<dyn ReductionQueue>,
        pipeline: &PipelineSettings,
    ) -> IngestionService {
        IngestionService::new(
            self.files.clone(),
            self.blobs.clone(),
            queue,
            pipeline.ingestion_config(),
        )
    }

    /// Parcelwise reduction worker.
    pub fn reduction_worker(
        &self,
        reference: &ReferenceData,
        pipeline: &PipelineSettings,
    ) -> ParcelwiseReductionWorker {
        ParcelwiseReductionWorker::new(
            ParcelwiseReductionPorts::new(
                self.files.clone(),
                self.parcellations.clone(),
                self.blobs.clone(),
                self.codec.clone(),
            ),
            Arc::clone(&reference.reduction_atlas),
            pipeline.reduction_config(),
        )
    }

    /// Coordinate lookup service.
    pub fn point_query(&self) -> PointQueryService {
        PointQueryService::new(self.point_query.clone())
    }

    /// Analysis orchestrator. Must be called inside a tokio runtime.
    pub fn orchestrator(
        &self,
        reference: &ReferenceData,
        settings: &ServerSettings,
        pipeline: &PipelineSettings,
    ) -> AnalysisOrchestrator {
        let decode = DecodeService::new(
            self.decode_corpus.clone(),
            self.blobs.clone(),
            self.codec.clone(),
            Arc::clone(&reference.mask),
            pipeline.decode_config(),
        );
        let mapping = ConnectivityMappingService::new(
            Arc::new(PrecomputedChunkMapper::new(
                self.blobs.clone(),
                self.codec.clone(),
            )),
            Arc::clone(&reference.reduction_atlas),
            Arc::clone(&reference.mask),
            pipeline.mapping_config(settings.connectome()),
        );
        AnalysisOrchestrator::new(
            AnalysisOrchestratorPorts::new(self.tasks.clone(), self.blobs.clone(), self.codec.clone()),
            AnalysisStages::new(decode, mapping),
            Arc::new(DefaultClock),
            pipeline.orchestrator_config(),
        )
    }
}

fn build_app(
    health_state: web::Data<HealthState>,
    http_state: web::Data<HttpState>,
    max_upload_bytes: usize,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(health_state)
        .app_data(http_state)
        .app_data(web::PayloadConfig::new(max_upload_bytes))
        .wrap(RequestSpan)
        .configure(configure_api)
        .service(ready)
        .service(live)
}

/// Construct an Actix HTTP server bound to `bind_addr`.
///
/// The caller marks `health_state` ready once startup work has finished.
///
/// # Errors
/// Propagates [`std::io::Error`] when binding the socket fails.
pub fn create_server(
    health_state: web::Data<HealthState>,
    http_state: HttpState,
    bind_addr: SocketAddr,
) -> std::io::Result<Server> {
    let max_upload_bytes = http_state.max_upload_bytes;
    let http_state = web::Data::new(http_state);
    let server = HttpServer::new(move || {
        build_app(health_state.clone(), http_state.clone(), max_upload_bytes)
    })
    .bind(bind_addr)?
    .run();
    info!(%bind_addr, "http server listening");
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemoryCorpus, JsonVolumeCodec};
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;
    use rstest::rstest;

    #[rstest]
    #[actix_web::test]
    async fn app_serves_probes_and_api_with_request_ids() {
        let corpus = InMemoryCorpus::new(vec![1.0, 2.0]);
        let health = web::Data::new(HealthState::new());
        health.mark_ready();
        let state = HttpState::new(
            corpus.orchestrator.clone(),
            corpus.ingestion.clone(),
            corpus.point_query.clone(),
            Arc::new(JsonVolumeCodec),
        );
        let app =
            actix_test::init_service(build_app(health, web::Data::new(state), 1024)).await;

        let probe = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/health/ready").to_request(),
        )
        .await;
        assert_eq!(probe.status(), StatusCode::OK);

        let lookup = actix_test::call_service(
            &app,
            actix_test::TestRequest::get()
                .uri("/api/v1/locations?x=0&y=0&z=0&map_type=connectivity")
                .to_request(),
        )
        .await;
        assert_eq!(lookup.status(), StatusCode::OK);
        assert!(lookup.headers().contains_key("request-id"));
    }

    #[rstest]
    #[actix_web::test]
    async fn oversized_bodies_are_refused() {
        let corpus = InMemoryCorpus::new(vec![1.0, 2.0]);
        let state = HttpState::new(
            corpus.orchestrator.clone(),
            corpus.ingestion.clone(),
            corpus.point_query.clone(),
            Arc::new(JsonVolumeCodec),
        );
        let app = actix_test::init_service(build_app(
            web::Data::new(HealthState::new()),
            web::Data::new(state),
            16,
        ))
        .await;

        let response = actix_test::call_service(
            &app,
            actix_test::TestRequest::post()
                .uri("/api/v1/decode?taxonomy_level=domain")
                .set_payload(vec![0_u8; 64])
                .to_request(),
        )
        .await;

        assert!(response.status().is_client_error());
    }
}
