//! Driven port for reading the decode corpus and taxonomy membership.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::imaging::FileKind;
use crate::domain::{TaxonomyLevel, VisibilityScope};

define_port_error! {
    /// Errors raised while reading the corpus.
    pub enum DecodeCorpusRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } =>
            "decode corpus connection failed: {message}",
        /// Query failed during execution.
        Query { message: String } =>
            "decode corpus query failed: {message}",
    }
}

/// Subject eligible for decoding with its first qualifying map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusSubject {
    /// Subject id.
    pub subject_id: i64,
    /// Blob key of the subject's first volumetric connectivity file.
    pub file_path: String,
    /// Kind of that file.
    pub filetype: FileKind,
}

/// A subject's membership of one taxon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonMembership {
    /// Subject id.
    pub subject_id: i64,
    /// Taxon name at the requested level.
    pub taxon: String,
}

/// Port for corpus reads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecodeCorpusRepository: Send + Sync {
    /// Subjects with a volumetric connectivity file visible under `scope`,
    /// ordered by subject id.
    async fn eligible_subjects(
        &self,
        scope: VisibilityScope,
    ) -> Result<Vec<CorpusSubject>, DecodeCorpusRepositoryError>;

    /// Taxon memberships of `subject_ids` at `level`.
    ///
    /// Subdomain and domain membership is derived through the subject's
    /// symptoms. Symptoms hidden under `scope` contribute nothing.
    async fn memberships(
        &self,
        level: TaxonomyLevel,
        scope: VisibilityScope,
        subject_ids: Vec<i64>,
    ) -> Result<Vec<TaxonMembership>, DecodeCorpusRepositoryError>;
}
