//! Task polling handlers.
//!
//! ```text
//! GET /api/v1/tasks/{id}         Current state and progress
//! GET /api/v1/tasks/{id}/result  Terminal outcome, 409 while running
//! ```

use actix_web::{HttpResponse, get, http::header, web};

use crate::domain::TaskId;
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

/// Current status of a task.
///
/// # Errors
///
/// - `400 Bad Request`: the id is not a UUID.
/// - `404 Not Found`: no such task.
#[get("/tasks/{task_id}")]
pub async fn get_task_status(
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let task_id: TaskId = path.parse()?;
    let status = state.orchestrator.status(task_id).await?;
    Ok(HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .json(status))
}

/// Result of a finished task.
///
/// Failed tasks answer `200` with `state: FAILURE` and the recorded error.
///
/// # Errors
///
/// - `400 Bad Request`: the id is not a UUID.
/// - `404 Not Found`: no such task.
/// - `409 Conflict`: the task is still PENDING or PROGRESS.
#[get("/tasks/{task_id}/result")]
pub async fn get_task_result(
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let task_id: TaskId = path.parse()?;
    let outcome = state.orchestrator.result(task_id).await?;
    Ok(HttpResponse::Ok().json(outcome))
}
