//! Registration workflow for parcellation atlases.

use std::sync::Arc;

use tracing::{info, warn};

use super::{
    AtlasDefinition, AtlasIndex, AtlasOverrideReport, BACKGROUND_PARCEL_VALUE, Parcellation,
    build_atlas_index,
};
use crate::domain::Error;
use crate::domain::imaging::ReferenceMask;
use crate::domain::ports::{ParcellationRepository, ParcellationRepositoryError};

/// Result of [`ParcellationRegistryService::register`].
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    /// A new parcellation was stored.
    Registered {
        /// Stored row.
        parcellation: Parcellation,
        /// Number of parcels created.
        parcel_count: usize,
        /// Number of voxel rows created.
        voxel_count: usize,
        /// Masked voxels assigned to the background parcel.
        unlabeled_mask_voxels: usize,
    },
    /// The same atlas was already stored under this name.
    Unchanged(Parcellation),
    /// An existing parcellation was rebuilt from a new atlas.
    Overridden {
        /// Recovery details for parcelwise rows.
        report: AtlasOverrideReport,
        /// Number of voxel rows after the rebuild.
        voxel_count: usize,
    },
}

/// Registers atlases against the reference mask.
#[derive(Clone)]
pub struct ParcellationRegistryService {
    repository: Arc<dyn ParcellationRepository>,
    mask: Arc<ReferenceMask>,
}

impl ParcellationRegistryService {
    /// Create the service.
    pub fn new(repository: Arc<dyn ParcellationRepository>, mask: Arc<ReferenceMask>) -> Self {
        Self { repository, mask }
    }

    /// Register `definition`, optionally overriding an atlas of the same name.
    ///
    /// Re-registering identical content under an existing name is a no-op.
    /// Different content under an existing name is rejected unless
    /// `override_existing` is set.
    pub async fn register(
        &self,
        definition: AtlasDefinition,
        override_existing: bool,
    ) -> Result<RegistrationOutcome, Error> {
        let index = build_atlas_index(&definition, &self.mask)
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        if index
            .parcels
            .iter()
            .all(|parcel| parcel.value == BACKGROUND_PARCEL_VALUE)
        {
            return Err(Error::invalid_request(format!(
                "atlas {} contains no labelled regions",
                index.name
            )));
        }
        if index.unlabeled_mask_voxels > 0 {
            warn!(
                parcellation = %index.name,
                unlabeled = index.unlabeled_mask_voxels,
                "masked voxels with background label assigned to the background parcel"
            );
        }

        let existing = self
            .repository
            .find_by_name(&index.name)
            .await
            .map_err(map_repository_error)?;

        match existing {
            None => self.create(index).await,
            Some(current) if override_existing => self.replace(current, index).await,
            Some(current) if current.content_hash == index.content_hash => {
                info!(parcellation = %current.name, "parcellation already registered");
                Ok(RegistrationOutcome::Unchanged(current))
            }
            Some(current) => Err(Error::conflict(format!(
                "parcellation {} already exists; pass override to replace it",
                current.name
            ))),
        }
    }

    async fn create(&self, index: AtlasIndex) -> Result<RegistrationOutcome, Error> {
        match self.repository.create(&index).await {
            Ok(parcellation) => {
                info!(
                    parcellation = %parcellation.name,
                    parcels = index.parcels.len(),
                    voxels = index.voxels.len(),
                    "parcellation registered"
                );
                Ok(RegistrationOutcome::Registered {
                    parcellation,
                    parcel_count: index.parcels.len(),
                    voxel_count: index.voxels.len(),
                    unlabeled_mask_voxels: index.unlabeled_mask_voxels,
                })
            }
            Err(ParcellationRepositoryError::Conflict { .. }) => self.replay_conflict(&index).await,
            Err(err) => Err(map_repository_error(err)),
        }
    }

    async fn replay_conflict(&self, index: &AtlasIndex) -> Result<RegistrationOutcome, Error> {
        let current = self
            .repository
            .find_by_name(&index.name)
            .await
            .map_err(map_repository_error)?
            .ok_or_else(|| Error::internal("parcellation vanished after a name conflict"))?;
        if current.content_hash == index.content_hash {
            Ok(RegistrationOutcome::Unchanged(current))
        } else {
            Err(Error::conflict(format!(
                "parcellation {} was registered concurrently with different content",
                current.name
            )))
        }
    }

    async fn replace(
        &self,
        current: Parcellation,
        index: AtlasIndex,
    ) -> Result<RegistrationOutcome, Error> {
        let report = self
            .repository
            .replace(current.id, &index)
            .await
            .map_err(map_repository_error)?;
        if !report.orphaned.is_empty() {
            warn!(
                parcellation = %current.name,
                orphaned = report.orphaned.len(),
                "parcelwise values could not be re-attached after atlas override"
            );
        }
        info!(
            parcellation = %current.name,
            reattached = report.reattached,
            "parcellation overridden"
        );
        Ok(RegistrationOutcome::Overridden {
            report,
            voxel_count: index.voxels.len(),
        })
    }
}

fn map_repository_error(error: ParcellationRepositoryError) -> Error {
    match error {
        ParcellationRepositoryError::Connection { message } => Error::service_unavailable(message),
        ParcellationRepositoryError::Query { message } => Error::internal(message),
        ParcellationRepositoryError::Conflict { message } => Error::conflict(message),
    }
}
