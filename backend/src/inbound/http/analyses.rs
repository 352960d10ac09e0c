//! Analysis submission handlers.
//!
//! ```text
//! POST /api/v1/decode?taxonomy_level=domain    Decode a statistical map
//! POST /api/v1/analyses?taxonomy_level=domain  Map a drawn region, then decode
//! ```
//!
//! Both endpoints take the raw `.nii` or `.nii.gz` bytes as the request body
//! and answer `202 Accepted` with the new task id. Validation failures are
//! reported synchronously and never create a task.

use actix_web::{HttpResponse, post, web};
use serde::{Deserialize, Serialize};

use crate::domain::imaging::{FileKind, Volume};
use crate::domain::{Error, TaskId, TaxonomyLevel};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Query string shared by the submission endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionQuery {
    /// `symptom`, `subdomain`, or `domain`.
    pub taxonomy_level: Option<String>,
}

impl SubmissionQuery {
    fn level(&self) -> Result<TaxonomyLevel, Error> {
        self.taxonomy_level
            .as_deref()
            .ok_or_else(|| Error::invalid_request("taxonomy_level is required"))?
            .parse()
    }
}

/// Accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    /// Identifier to poll.
    pub task_id: TaskId,
}

fn accepted(task_id: TaskId) -> HttpResponse {
    HttpResponse::Accepted().json(SubmissionResponse { task_id })
}

/// Decode the uploaded body as a NIfTI volume.
///
/// Gzip-compressed bodies are read as `.nii.gz`, anything else as `.nii`.
async fn read_query_image(state: &HttpState, body: web::Bytes) -> Result<Volume, Error> {
    if body.is_empty() {
        return Err(Error::invalid_request("request body must contain a NIfTI image"));
    }
    if body.len() > state.max_upload_bytes {
        return Err(Error::invalid_request(format!(
            "query image exceeds {} bytes",
            state.max_upload_bytes
        )));
    }
    let kind = if body.starts_with(&GZIP_MAGIC) {
        FileKind::NiftiGz
    } else {
        FileKind::Nifti
    };
    let codec = state.codec.clone();
    web::block(move || codec.decode_volume(&body, &kind))
        .await
        .map_err(|err| Error::internal(format!("image decoding did not complete: {err}")))?
        .map_err(|err| Error::invalid_request(format!("unreadable query image: {err}")))
}

/// Submit a decode of a statistical map.
///
/// # Errors
///
/// - `400 Bad Request`: missing or invalid taxonomy level, unreadable image,
///   or an image off the reference grid.
/// - `503 Service Unavailable`: the task store is unavailable.
#[post("/decode")]
pub async fn submit_decode(
    state: web::Data<HttpState>,
    query: web::Query<SubmissionQuery>,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let level = query.level()?;
    let image = read_query_image(&state, body).await?;
    let task_id = state
        .orchestrator
        .submit_decode(&image, level, state.scope)
        .await?;
    Ok(accepted(task_id))
}

/// Submit a connectivity mapping of a drawn region followed by a decode.
///
/// # Errors
///
/// - `400 Bad Request`: missing or invalid taxonomy level, unreadable image,
///   or a region that is empty or off the reference grid.
/// - `503 Service Unavailable`: the task store is unavailable.
#[post("/analyses")]
pub async fn submit_analysis(
    state: web::Data<HttpState>,
    query: web::Query<SubmissionQuery>,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    let level = query.level()?;
    let region = read_query_image(&state, body).await?;
    let task_id = state
        .orchestrator
        .submit_full_analysis(region, level, state.scope)
        .await?;
    Ok(accepted(task_id))
}
