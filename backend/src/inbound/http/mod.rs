//! HTTP inbound adapter exposing REST endpoints.

pub mod analyses;
pub mod error;
pub mod files;
pub mod health;
pub mod locations;
pub mod request_span;
pub mod state;
pub mod tasks;
#[cfg(test)]
mod tests;

use actix_web::web;

pub use error::ApiResult;

use crate::domain::Error;

/// Register the `/api/v1` endpoints on `cfg`.
///
/// Malformed query strings are reported as domain `invalid_request` errors
/// so every client error shares the JSON error shape.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::QueryConfig::default()
            .error_handler(|err, _request| Error::invalid_request(err.to_string()).into()),
    )
    .service(
        web::scope("/api/v1")
            .service(analyses::submit_decode)
            .service(analyses::submit_analysis)
            .service(files::ingest_file)
            .service(files::reindex_file)
            .service(tasks::get_task_status)
            .service(tasks::get_task_result)
            .service(locations::values_at_location),
    );
}
