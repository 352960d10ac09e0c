//! Driven port for the parcellation registry and voxelwise index.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::parcellation::{AtlasIndex, AtlasOverrideReport, Parcel, Parcellation};

define_port_error! {
    /// Errors raised while reading or writing parcellations.
    pub enum ParcellationRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } =>
            "parcellation repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } =>
            "parcellation repository query failed: {message}",
        /// A parcellation with the same name already exists.
        Conflict { message: String } =>
            "parcellation conflict: {message}",
    }
}

/// Port for atlas registration and parcel lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParcellationRepository: Send + Sync {
    /// Lookup a parcellation by its unique name.
    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Parcellation>, ParcellationRepositoryError>;

    /// All parcels of a parcellation in ascending value order.
    async fn parcels(&self, parcellation_id: i64) -> Result<Vec<Parcel>, ParcellationRepositoryError>;

    /// Insert the parcellation, its parcels, and its voxel rows.
    ///
    /// Implementations must write all three in one transaction and skip
    /// voxel rows that already exist.
    async fn create(&self, index: &AtlasIndex) -> Result<Parcellation, ParcellationRepositoryError>;

    /// Replace an existing parcellation's parcels and voxel rows.
    ///
    /// Implementations must, in one transaction, capture every parcelwise
    /// row referencing the old parcels, delete and rebuild parcels and voxel
    /// rows from `index`, then re-attach captured rows using
    /// [`crate::domain::parcellation::plan_reattachment`].
    async fn replace(
        &self,
        parcellation_id: i64,
        index: &AtlasIndex,
    ) -> Result<AtlasOverrideReport, ParcellationRepositoryError>;
}
