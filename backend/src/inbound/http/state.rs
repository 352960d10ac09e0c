//! Shared HTTP adapter state.
//!
//! HTTP handlers accept this state via `actix_web::web::Data` so they only
//! depend on domain services and ports and remain testable without I/O.

use std::sync::Arc;

use crate::domain::VisibilityScope;
use crate::domain::analysis_orchestrator::AnalysisOrchestrator;
use crate::domain::ingestion::IngestionService;
use crate::domain::point_query::PointQueryService;
use crate::domain::ports::VolumeCodec;

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Submits and reports analysis tasks.
    pub orchestrator: AnalysisOrchestrator,
    /// Stores uploaded corpus files.
    pub ingestion: IngestionService,
    /// Serves coordinate lookups.
    pub point_query: PointQueryService,
    /// Decodes uploaded query images.
    pub codec: Arc<dyn VolumeCodec>,
    /// Corpus visibility applied to decode submissions.
    pub scope: VisibilityScope,
    /// Largest accepted query image.
    pub max_upload_bytes: usize,
}

impl HttpState {
    /// Bundle handler dependencies.
    pub fn new(
        orchestrator: AnalysisOrchestrator,
        ingestion: IngestionService,
        point_query: PointQueryService,
        codec: Arc<dyn VolumeCodec>,
    ) -> Self {
        Self {
            orchestrator,
            ingestion,
            point_query,
            codec,
            scope: VisibilityScope::Public,
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }

    /// Decode against `scope` instead of the public corpus.
    #[must_use]
    pub fn with_scope(mut self, scope: VisibilityScope) -> Self {
        self.scope = scope;
        self
    }

    /// Reject uploads larger than `max_upload_bytes`.
    #[must_use]
    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}
