//! Correlation decode of a query map against the corpus.
//!
//! Every eligible subject's first volumetric connectivity map is masked
//! with the reference mask and correlated with the masked query. Subjects
//! are grouped by taxon and each group is tested against a zero mean.
//! Per-subject failures are recorded and excluded; they never abort the
//! decode.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::imaging::{ReferenceMask, Volume};
use crate::domain::port_error_mapping::{map_blob_error, map_codec_error, map_corpus_error};
use crate::domain::ports::{BlobStore, CorpusSubject, DecodeCorpusRepository, VolumeCodec};
use crate::domain::progress::ProgressReporter;
use crate::domain::{Error, TaxonomyLevel, VisibilityScope};

mod statistics;

pub use statistics::{
    TaxonStatistics, group_by_taxon, pearson, sort_by_mean_descending, summarize,
};

/// Structured error returned when the corpus has no eligible subjects.
pub const EMPTY_CORPUS_ERROR: &str = "No taxonomy files found.";

/// Structured error returned when no subject map could be correlated.
pub const UNCORRELATED_CORPUS_ERROR: &str = "No subject maps could be correlated with the query.";

/// Decode tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeConfig {
    /// Subject maps fetched and correlated concurrently.
    pub fetch_concurrency: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 8,
        }
    }
}

/// Raw correlation of one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectCorrelation {
    /// Subject id.
    pub subject_id: i64,
    /// Pearson r against the query.
    pub correlation: f64,
    /// Taxa the subject belongs to at the requested level.
    pub taxa: Vec<String>,
}

/// A subject excluded from the statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectFailure {
    /// Subject id.
    pub subject_id: i64,
    /// Failure message.
    pub error: String,
}

/// Completed decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeReport {
    /// Level results were grouped at.
    pub taxonomy_level: TaxonomyLevel,
    /// Per-taxon statistics sorted by mean correlation, largest first.
    pub per_taxon_stats: Vec<TaxonStatistics>,
    /// Per-subject correlations in subject order.
    pub per_subject_raw: Vec<SubjectCorrelation>,
    /// Subjects excluded because their map could not be correlated.
    pub failures: Vec<SubjectFailure>,
}

/// Outcome of [`DecodeService::decode`].
///
/// An empty corpus or a level without members is a structured result, not
/// an error, so the task still completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodeOutcome {
    /// Statistics were computed.
    Completed(DecodeReport),
    /// Nothing to report.
    Empty {
        /// Explanation surfaced to the caller.
        error: String,
        /// Subjects excluded before grouping. Omitted when none failed.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failures: Vec<SubjectFailure>,
    },
}

impl DecodeOutcome {
    fn empty(error: impl Into<String>) -> Self {
        Self::empty_with_failures(error, Vec::new())
    }

    fn empty_with_failures(error: impl Into<String>, failures: Vec<SubjectFailure>) -> Self {
        Self::Empty {
            error: error.into(),
            failures,
        }
    }
}

/// Correlates query maps against the corpus.
#[derive(Clone)]
pub struct DecodeService {
    corpus: Arc<dyn DecodeCorpusRepository>,
    blobs: Arc<dyn BlobStore>,
    codec: Arc<dyn VolumeCodec>,
    mask: Arc<ReferenceMask>,
    config: DecodeConfig,
}

impl DecodeService {
    /// Create the service.
    pub fn new(
        corpus: Arc<dyn DecodeCorpusRepository>,
        blobs: Arc<dyn BlobStore>,
        codec: Arc<dyn VolumeCodec>,
        mask: Arc<ReferenceMask>,
        config: DecodeConfig,
    ) -> Self {
        Self {
            corpus,
            blobs,
            codec,
            mask,
            config,
        }
    }

    /// Reference mask shared by the corpus and every query.
    pub fn mask(&self) -> &Arc<ReferenceMask> {
        &self.mask
    }

    /// Mask a query volume, rejecting volumes off the reference grid.
    pub fn mask_query(&self, query: &Volume) -> Result<Vec<f64>, Error> {
        self.mask
            .extract(query)
            .map_err(|err| Error::invalid_request(err.to_string()))
    }

    /// Decode a masked query vector.
    pub async fn decode(
        &self,
        query: &[f64],
        level: TaxonomyLevel,
        scope: VisibilityScope,
        progress: &dyn ProgressReporter,
    ) -> Result<DecodeOutcome, Error> {
        let subjects = self
            .corpus
            .eligible_subjects(scope)
            .await
            .map_err(map_corpus_error)?;
        if subjects.is_empty() {
            info!(level = %level, "decode skipped: corpus is empty");
            return Ok(DecodeOutcome::empty(EMPTY_CORPUS_ERROR));
        }

        let (correlations, failures) = self.correlate_all(query, subjects, progress).await;
        if correlations.is_empty() {
            warn!(level = %level, failed = failures.len(), "decode found no usable subject maps");
            return Ok(DecodeOutcome::empty_with_failures(
                UNCORRELATED_CORPUS_ERROR,
                failures,
            ));
        }

        let memberships = self
            .corpus
            .memberships(level, scope, correlations.keys().copied().collect())
            .await
            .map_err(map_corpus_error)?;
        let groups = group_by_taxon(&correlations, &memberships);
        if groups.is_empty() {
            return Ok(DecodeOutcome::empty_with_failures(
                format!("No columns found for taxonomy level: {level}"),
                failures,
            ));
        }

        let mut per_taxon_stats = groups
            .iter()
            .filter_map(|(taxon, values)| summarize(taxon, values))
            .collect::<Vec<_>>();
        sort_by_mean_descending(&mut per_taxon_stats);

        let mut taxa_by_subject: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for membership in &memberships {
            let taxa = taxa_by_subject.entry(membership.subject_id).or_default();
            if !taxa.contains(&membership.taxon) {
                taxa.push(membership.taxon.clone());
            }
        }
        let per_subject_raw = correlations
            .iter()
            .map(|(subject_id, correlation)| SubjectCorrelation {
                subject_id: *subject_id,
                correlation: *correlation,
                taxa: taxa_by_subject.remove(subject_id).unwrap_or_default(),
            })
            .collect();

        info!(
            level = %level,
            taxa = per_taxon_stats.len(),
            subjects = correlations.len(),
            failed = failures.len(),
            "decode completed"
        );
        Ok(DecodeOutcome::Completed(DecodeReport {
            taxonomy_level: level,
            per_taxon_stats,
            per_subject_raw,
            failures,
        }))
    }

    async fn correlate_all(
        &self,
        query: &[f64],
        subjects: Vec<CorpusSubject>,
        progress: &dyn ProgressReporter,
    ) -> (BTreeMap<i64, f64>, Vec<SubjectFailure>) {
        let total = subjects.len();
        let mut correlations = BTreeMap::new();
        let mut failures = Vec::new();

        let mut results = stream::iter(subjects)
            .map(|subject| self.correlate_subject(subject, query))
            .buffered(self.config.fetch_concurrency.max(1));

        let mut completed = 0_usize;
        while let Some((subject_id, result)) = results.next().await {
            completed += 1;
            progress
                .report(
                    percent_of(completed, total),
                    &format!("Calculating correlation for subject {completed} of {total}"),
                )
                .await;
            match result {
                Ok(correlation) => {
                    correlations.insert(subject_id, correlation);
                }
                Err(error) => {
                    warn!(subject_id, error = %error, "subject excluded from decode");
                    failures.push(SubjectFailure {
                        subject_id,
                        error: error.to_string(),
                    });
                }
            }
        }
        (correlations, failures)
    }

    async fn correlate_subject(
        &self,
        subject: CorpusSubject,
        query: &[f64],
    ) -> (i64, Result<f64, Error>) {
        let subject_id = subject.subject_id;
        let vector = match self.load_masked(subject).await {
            Ok(vector) => vector,
            Err(error) => return (subject_id, Err(error)),
        };
        let r = pearson(query, &vector);
        if r.is_nan() {
            return (
                subject_id,
                Err(Error::invalid_request(
                    "correlation is undefined for a constant map",
                )),
            );
        }
        (subject_id, Ok(r))
    }

    async fn load_masked(&self, subject: CorpusSubject) -> Result<Vec<f64>, Error> {
        let bytes = self
            .blobs
            .get(&subject.file_path)
            .await
            .map_err(map_blob_error)?;
        let codec = Arc::clone(&self.codec);
        let mask = Arc::clone(&self.mask);
        tokio::task::spawn_blocking(move || {
            let volume = codec
                .decode_volume(&bytes, &subject.filetype)
                .map_err(map_codec_error)?;
            mask.extract(&volume)
                .map_err(|err| Error::invalid_request(err.to_string()))
        })
        .await
        .map_err(|err| Error::internal(format!("correlation task failed: {err}")))?
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "subject counts are far below 2^52"
)]
fn percent_of(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}
