//! Coordinate lookup handler.
//!
//! ```text
//! GET /api/v1/locations?x=10&y=-4&z=22&map_type=connectivity
//! ```
//!
//! Answers a JSON object mapping owner ids to the largest parcel value any
//! of the owner's files holds at the coordinate. Coordinates outside the
//! reference mask answer `{}`.

use actix_web::{HttpResponse, get, web};
use serde::Deserialize;

use crate::domain::{Error, FileCategory};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

/// Coordinate lookup parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationQuery {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub z: Option<i32>,
    /// `connectivity`, `roi`, or `group_level_map`.
    pub map_type: Option<String>,
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, Error> {
    value.ok_or_else(|| Error::invalid_request(format!("{name} is required")))
}

/// Largest value per owner at a template coordinate.
///
/// # Errors
///
/// - `400 Bad Request`: a coordinate or the map type is missing or invalid.
/// - `503 Service Unavailable`: the database is unavailable.
#[get("/locations")]
pub async fn values_at_location(
    state: web::Data<HttpState>,
    query: web::Query<LocationQuery>,
) -> ApiResult<HttpResponse> {
    let LocationQuery { x, y, z, map_type } = query.into_inner();
    let category: FileCategory = required(map_type, "map_type")?.parse()?;
    let values = state
        .point_query
        .values_at(
            required(x, "x")?,
            required(y, "y")?,
            required(z, "z")?,
            category,
        )
        .await?;
    Ok(HttpResponse::Ok().json(values))
}
