//! PostgreSQL-backed `DecodeCorpusRepository` implementation using Diesel ORM.
//!
//! Reads the subject taxonomy and the connectivity maps the decoder
//! correlates against. Public scope hides internal-use subjects and symptoms.

use std::collections::BTreeMap;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_error_mapping::{DieselFailure, classify_diesel_error, map_pool_error_message};
use super::pool::{DbPool, PoolError};
use super::schema::{derived_files, domains, subdomains, subjects, subjects_symptoms, symptoms};
use crate::domain::imaging::FileKind;
use crate::domain::ports::{
    CorpusSubject, DecodeCorpusRepository, DecodeCorpusRepositoryError, TaxonMembership,
};
use crate::domain::{FileCategory, TaxonomyLevel, VisibilityScope};

/// Diesel-backed decode corpus.
#[derive(Clone)]
pub struct DieselDecodeCorpusRepository {
    pool: DbPool,
}

impl DieselDecodeCorpusRepository {
    /// Create a repository over `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> DecodeCorpusRepositoryError {
    DecodeCorpusRepositoryError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error) -> DecodeCorpusRepositoryError {
    match classify_diesel_error(error, "decode corpus query") {
        DieselFailure::Connection(message) => DecodeCorpusRepositoryError::connection(message),
        DieselFailure::NotFound => DecodeCorpusRepositoryError::query("record not found"),
        DieselFailure::Conflict(message) | DieselFailure::Query(message) => {
            DecodeCorpusRepositoryError::query(message)
        }
    }
}

/// First volumetric map per subject, in subject then file id order.
fn first_volumetric_per_subject(rows: Vec<(i64, String, String)>) -> Vec<CorpusSubject> {
    let mut first: BTreeMap<i64, CorpusSubject> = BTreeMap::new();
    for (subject_id, file_path, filetype) in rows {
        let filetype = FileKind::from_label(&filetype);
        if filetype.is_volumetric() {
            first.entry(subject_id).or_insert(CorpusSubject {
                subject_id,
                file_path,
                filetype,
            });
        }
    }
    first.into_values().collect()
}

/// Pick the taxon of a symptom row at `level`.
fn taxon_at(
    level: TaxonomyLevel,
    symptom: String,
    subdomain: Option<String>,
    domain: String,
) -> Option<String> {
    match level {
        TaxonomyLevel::Symptom => Some(symptom),
        TaxonomyLevel::Subdomain => subdomain,
        TaxonomyLevel::Domain => Some(domain),
    }
}

#[async_trait]
impl DecodeCorpusRepository for DieselDecodeCorpusRepository {
    async fn eligible_subjects(
        &self,
        scope: VisibilityScope,
    ) -> Result<Vec<CorpusSubject>, DecodeCorpusRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let mut query = derived_files::table
            .inner_join(subjects::table.on(derived_files::subject_id.eq(subjects::id.nullable())))
            .filter(derived_files::kind.eq(FileCategory::Connectivity.as_str()))
            .filter(derived_files::source_file_id.is_null())
            .into_boxed();
        if scope == VisibilityScope::Public {
            query = query.filter(subjects::internal_use_only.eq(false));
        }
        let rows = query
            .order((subjects::id.asc(), derived_files::id.asc()))
            .select((subjects::id, derived_files::path, derived_files::filetype))
            .load::<(i64, String, String)>(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(first_volumetric_per_subject(rows))
    }

    async fn memberships(
        &self,
        level: TaxonomyLevel,
        scope: VisibilityScope,
        subject_ids: Vec<i64>,
    ) -> Result<Vec<TaxonMembership>, DecodeCorpusRepositoryError> {
        if subject_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let mut query = subjects_symptoms::table
            .inner_join(symptoms::table.inner_join(domains::table))
            .left_join(
                subdomains::table.on(symptoms::subdomain_id.eq(subdomains::id.nullable())),
            )
            .filter(subjects_symptoms::subject_id.eq_any(subject_ids))
            .into_boxed();
        if !scope.admits_symptom(level, true) {
            query = query.filter(symptoms::internal_use_only.eq(false));
        }
        let rows = query
            .order((subjects_symptoms::subject_id.asc(), symptoms::name.asc()))
            .select((
                subjects_symptoms::subject_id,
                symptoms::name,
                subdomains::name.nullable(),
                domains::name,
            ))
            .load::<(i64, String, Option<String>, String)>(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|(subject_id, symptom, subdomain, domain)| {
                taxon_at(level, symptom, subdomain, domain)
                    .map(|taxon| TaxonMembership { subject_id, taxon })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn keeps_the_first_volumetric_map_per_subject() {
        let rows = vec![
            (1, "a.csv".to_owned(), "csv".to_owned()),
            (1, "a.nii.gz".to_owned(), "nii.gz".to_owned()),
            (1, "b.nii".to_owned(), "nii".to_owned()),
            (2, "c.nii".to_owned(), "nii".to_owned()),
        ];
        let subjects = first_volumetric_per_subject(rows);
        let paths = subjects
            .iter()
            .map(|subject| (subject.subject_id, subject.file_path.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(paths, vec![(1, "a.nii.gz"), (2, "c.nii")]);
    }

    #[rstest]
    #[case(TaxonomyLevel::Symptom, Some("Aphasia"))]
    #[case(TaxonomyLevel::Subdomain, None)]
    #[case(TaxonomyLevel::Domain, Some("Language"))]
    fn picks_the_taxon_at_each_level(#[case] level: TaxonomyLevel, #[case] expected: Option<&str>) {
        let taxon = taxon_at(level, "Aphasia".to_owned(), None, "Language".to_owned());
        assert_eq!(taxon.as_deref(), expected);
    }
}
