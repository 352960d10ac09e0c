//! Point queries against the parcelwise index.
//!
//! A coordinate resolves to its parcel in every parcellation, and the
//! parcelwise rows of those parcels are aggregated per owner without loading
//! any volume.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::imaging::TemplateCoordinate;
use super::port_error_mapping::map_point_query_error;
use super::ports::{OwnedParcelValue, PointQueryRepository};
use super::{Error, FileCategory};

/// Keep the largest value per owner, rounded to two decimals.
///
/// When one owner has several files or parcellations covering the
/// coordinate, the maximum wins.
///
/// # Examples
/// ```
/// use lesion_bank::domain::point_query::max_per_owner;
/// use lesion_bank::domain::ports::OwnedParcelValue;
///
/// let values = [
///     OwnedParcelValue { owner_id: 1, value: 0.3 },
///     OwnedParcelValue { owner_id: 1, value: 0.7 },
/// ];
/// assert_eq!(max_per_owner(&values).get(&1), Some(&0.7));
/// ```
pub fn max_per_owner(values: &[OwnedParcelValue]) -> BTreeMap<i64, f64> {
    let mut best: BTreeMap<i64, f64> = BTreeMap::new();
    for row in values.iter().filter(|row| row.value.is_finite()) {
        best.entry(row.owner_id)
            .and_modify(|current| *current = current.max(row.value))
            .or_insert(row.value);
    }
    best.into_iter()
        .map(|(owner, value)| (owner, round_two_decimals(value)))
        .collect()
}

fn round_two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Serves `values_at` lookups.
#[derive(Clone)]
pub struct PointQueryService {
    repository: Arc<dyn PointQueryRepository>,
}

impl PointQueryService {
    /// Create the service.
    pub fn new(repository: Arc<dyn PointQueryRepository>) -> Self {
        Self { repository }
    }

    /// Maximum value per owner at `(x, y, z)` for `category`.
    ///
    /// Coordinates outside the mask yield an empty map.
    pub async fn values_at(
        &self,
        x: i32,
        y: i32,
        z: i32,
        category: FileCategory,
    ) -> Result<BTreeMap<i64, f64>, Error> {
        let rows = self
            .repository
            .values_at(TemplateCoordinate::new(x, y, z), category)
            .await
            .map_err(map_point_query_error)?;
        Ok(max_per_owner(&rows))
    }
}
