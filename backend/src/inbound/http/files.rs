//! Corpus file ingestion handlers.
//!
//! ```text
//! POST /api/v1/files?filename=..&category=roi&subject_id=7   Ingest a file
//! POST /api/v1/files/{id}/reindex                            Re-run reduction
//! ```
//!
//! The request body carries the raw file bytes. Owner and tag fields are
//! query parameters; which ones are required depends on the category.

use actix_web::{HttpResponse, post, web};
use serde::{Deserialize, Serialize};

use crate::domain::ingestion::{IngestOutcome, IngestRequest};
use crate::domain::{Error, FileCategory, FileDescriptor, FileRecord, FileTags, TaxonomyLevel};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

/// Query string of [`ingest_file`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestQuery {
    /// Declared filename; its extension selects the file type.
    pub filename: Option<String>,
    /// `roi`, `connectivity`, or `group_level_map`.
    pub category: Option<String>,
    /// Owning subject of ROI and connectivity files.
    pub subject_id: Option<i64>,
    /// Connectome a connectivity map was computed against.
    pub connectome: Option<String>,
    /// Statistic stored in a connectivity or group-level map.
    pub statistic: Option<String>,
    /// Taxonomy level of a group-level map.
    pub taxonomy_level: Option<String>,
    /// Taxon of a group-level map.
    pub taxon: Option<String>,
    /// Map family of a group-level map.
    pub map_type: Option<String>,
    /// Replace a stored file with the same content or path.
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

impl IngestQuery {
    fn descriptor(&self) -> Result<FileDescriptor, Error> {
        let category: FileCategory = self
            .category
            .as_deref()
            .ok_or_else(|| Error::invalid_request("category is required"))?
            .parse()?;
        let taxonomy_level = self
            .taxonomy_level
            .as_deref()
            .map(str::parse::<TaxonomyLevel>)
            .transpose()?;
        FileDescriptor::from_tags(
            category,
            FileTags {
                subject_id: self.subject_id,
                connectome: self.connectome.clone(),
                statistic: self.statistic.clone(),
                taxonomy_level,
                taxon: self.taxon.clone(),
                map_type: self.map_type.clone(),
            },
        )
    }
}

/// Stored file as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    /// File id.
    pub id: i64,
    /// Storage key.
    pub path: String,
    /// File category.
    pub category: FileCategory,
    /// Detected file type.
    pub filetype: String,
    /// Hex SHA-256 of the stored bytes.
    pub content_hash: String,
    /// Reduction state.
    pub index_status: String,
    /// Last reduction failure, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_error: Option<String>,
    /// Source upload of a parcelwise artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file_id: Option<i64>,
}

impl From<&FileRecord> for FileResponse {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            path: record.path.clone(),
            category: record.category(),
            filetype: record.filetype.to_string(),
            content_hash: record.content_hash.clone(),
            index_status: record.index_status.as_str().to_owned(),
            index_error: record.index_error.clone(),
            source_file_id: record.source_file_id,
        }
    }
}

/// Body of a successful ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// `stored`, `replaced`, or `duplicate_skipped`.
    pub outcome: String,
    /// Record the outcome refers to.
    pub file: FileResponse,
    /// Id of the record removed by an override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced_file_id: Option<i64>,
}

impl From<&IngestOutcome> for IngestResponse {
    fn from(outcome: &IngestOutcome) -> Self {
        let (label, replaced_file_id) = match outcome {
            IngestOutcome::Stored(_) => ("stored", None),
            IngestOutcome::Replaced {
                replaced_file_id, ..
            } => ("replaced", Some(*replaced_file_id)),
            IngestOutcome::DuplicateSkipped(_) => ("duplicate_skipped", None),
        };
        Self {
            outcome: label.to_owned(),
            file: FileResponse::from(outcome.record()),
            replaced_file_id,
        }
    }
}

/// Ingest the request body as a corpus file.
///
/// Answers `201 Created` for new or replacing content and `200 OK` when
/// identical content, or a group-level map at an occupied path, was already
/// stored and `override` is unset.
///
/// # Errors
///
/// - `400 Bad Request`: missing filename or category, tags the category
///   needs are absent, or the body is empty or too large.
/// - `503 Service Unavailable`: storage or the reduction queue is unavailable.
#[post("/files")]
pub async fn ingest_file(
    state: web::Data<HttpState>,
    query: web::Query<IngestQuery>,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let filename = query
        .filename
        .clone()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| Error::invalid_request("filename is required"))?;
    let descriptor = query.descriptor()?;
    let outcome = state
        .ingestion
        .ingest(IngestRequest {
            bytes: body.to_vec(),
            filename,
            descriptor,
            override_existing: query.override_existing,
        })
        .await?;
    let response = IngestResponse::from(&outcome);
    Ok(match outcome {
        IngestOutcome::DuplicateSkipped(_) => HttpResponse::Ok().json(response),
        IngestOutcome::Stored(_) | IngestOutcome::Replaced { .. } => {
            HttpResponse::Created().json(response)
        }
    })
}

/// Re-run parcelwise reduction for a stored file.
///
/// # Errors
///
/// - `400 Bad Request`: the file is not a volumetric upload.
/// - `404 Not Found`: no file has the given id.
/// - `503 Service Unavailable`: the reduction queue is unavailable.
#[post("/files/{file_id}/reindex")]
pub async fn reindex_file(
    state: web::Data<HttpState>,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    let record = state.ingestion.reindex(path.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(FileResponse::from(&record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn file_responses_use_camel_case_and_omit_absent_fields() {
        let response = IngestResponse {
            outcome: "stored".to_owned(),
            file: FileResponse {
                id: 3,
                path: "subjects/sub-7/roi/sub-7_file-1_roi.nii.gz".to_owned(),
                category: FileCategory::Roi,
                filetype: "nii.gz".to_owned(),
                content_hash: "abc".to_owned(),
                index_status: "pending".to_owned(),
                index_error: None,
                source_file_id: None,
            },
            replaced_file_id: None,
        };

        let value = serde_json::to_value(&response).expect("serialize");

        assert_eq!(
            value,
            json!({
                "outcome": "stored",
                "file": {
                    "id": 3,
                    "path": "subjects/sub-7/roi/sub-7_file-1_roi.nii.gz",
                    "category": "roi",
                    "filetype": "nii.gz",
                    "contentHash": "abc",
                    "indexStatus": "pending",
                }
            })
        );
    }

    #[rstest]
    fn override_flag_reads_from_the_override_parameter() {
        let query: IngestQuery =
            serde_json::from_value(json!({ "category": "roi", "subject_id": 7, "override": true }))
                .expect("deserialize");

        assert!(query.override_existing);
        assert_eq!(
            query.descriptor().expect("descriptor"),
            FileDescriptor::Roi { subject_id: 7 }
        );
    }
}
