//! Driven port for coordinate lookups against the spatial index.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::FileCategory;
use crate::domain::imaging::TemplateCoordinate;

define_port_error! {
    /// Errors raised while querying the spatial index.
    pub enum PointQueryRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } =>
            "point query connection failed: {message}",
        /// Query failed during execution.
        Query { message: String } =>
            "point query failed: {message}",
    }
}

/// Parcelwise value together with the owner of its file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwnedParcelValue {
    /// Subject id for subject files, group-level map file id otherwise.
    pub owner_id: i64,
    /// Stored scalar.
    pub value: f64,
}

/// Port resolving a coordinate to parcelwise values.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PointQueryRepository: Send + Sync {
    /// Every parcelwise value of `category` whose parcel covers `coordinate`,
    /// across all parcellations.
    async fn values_at(
        &self,
        coordinate: TemplateCoordinate,
        category: FileCategory,
    ) -> Result<Vec<OwnedParcelValue>, PointQueryRepositoryError>;
}
