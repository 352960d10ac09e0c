//! Parcellation registry: atlases, parcels, and the voxelwise spatial index.
//!
//! Building the index is pure: [`build_atlas_index`] turns an atlas label
//! volume and the reference mask into parcel definitions and one voxel
//! assignment per masked template coordinate. Persisting it is the job of
//! the `ParcellationRepository` port; orchestration lives in
//! [`ParcellationRegistryService`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::imaging::{ImagingError, ReferenceMask, TemplateCoordinate, Volume};

mod service;

pub use service::{ParcellationRegistryService, RegistrationOutcome};

/// Stored atlas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parcellation {
    /// Primary key.
    pub id: i64,
    /// Unique atlas name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Hex SHA-256 of the atlas file.
    pub content_hash: String,
}

/// One labelled region of a parcellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parcel {
    /// Primary key.
    pub id: i64,
    /// Owning parcellation.
    pub parcellation_id: i64,
    /// Integer label value in the atlas volume.
    pub value: i32,
    /// Human-readable label.
    pub label: String,
}

/// Parcel definition awaiting insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParcel {
    /// Integer label value in the atlas volume.
    pub value: i32,
    /// Human-readable label.
    pub label: String,
}

/// Voxelwise index entry awaiting insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelAssignment {
    /// Template-space coordinate.
    pub coordinate: TemplateCoordinate,
    /// Label value of the parcel covering the coordinate.
    pub parcel_value: i32,
}

/// Atlas as submitted for registration.
#[derive(Debug, Clone)]
pub struct AtlasDefinition {
    /// Unique atlas name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Integer label volume on the reference grid.
    pub labels: Volume,
    /// Optional label names keyed by value.
    pub label_names: BTreeMap<i32, String>,
    /// Hex SHA-256 of the atlas file.
    pub content_hash: String,
}

/// Everything needed to persist one parcellation.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasIndex {
    /// Unique atlas name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Hex SHA-256 of the atlas file.
    pub content_hash: String,
    /// Parcels in ascending value order.
    pub parcels: Vec<NewParcel>,
    /// One assignment per masked coordinate.
    pub voxels: Vec<VoxelAssignment>,
    /// Masked voxels assigned to the background parcel.
    pub unlabeled_mask_voxels: usize,
}

/// Label value of the background parcel.
pub const BACKGROUND_PARCEL_VALUE: i32 = 0;

/// Label of the background parcel unless the label map names value 0.
pub const BACKGROUND_PARCEL_LABEL: &str = "Background";

/// Default label for a parcel without an explicit name.
pub fn default_parcel_label(value: i32) -> String {
    format!("Region {value}")
}

/// Round a stored label value onto the integer label lattice.
#[expect(
    clippy::cast_possible_truncation,
    reason = "atlas labels are small integers stored as floats"
)]
pub fn label_value(raw: f32) -> i32 {
    raw.round() as i32
}

/// Build parcels and voxel assignments for `definition` under `mask`.
///
/// Parcels come from every distinct non-zero label in the atlas. Voxel
/// assignments cover every masked voxel: a masked voxel whose label is 0
/// maps to a background parcel, which is only created when such a voxel
/// exists. Background never receives parcelwise values.
///
/// # Errors
/// Returns [`ImagingError::GridMismatch`] when the atlas is not on the mask
/// grid.
pub fn build_atlas_index(
    definition: &AtlasDefinition,
    mask: &ReferenceMask,
) -> Result<AtlasIndex, ImagingError> {
    mask.ensure_same_grid(&definition.labels)?;

    let mut values = definition
        .labels
        .nonzero_voxels()
        .map(|(_, raw)| label_value(raw))
        .filter(|value| *value != BACKGROUND_PARCEL_VALUE)
        .collect::<BTreeSet<_>>();

    let affine = definition.labels.affine();
    let mut by_coordinate = BTreeMap::new();
    let mut unlabeled_mask_voxels = 0;
    for index in mask.voxels() {
        let value = definition
            .labels
            .value_at(*index)
            .map(label_value)
            .unwrap_or(BACKGROUND_PARCEL_VALUE);
        if value == BACKGROUND_PARCEL_VALUE {
            unlabeled_mask_voxels += 1;
        }
        let coordinate = TemplateCoordinate::from_world(affine.voxel_to_world(*index))?;
        by_coordinate.entry(coordinate).or_insert(value);
    }
    if unlabeled_mask_voxels > 0 {
        values.insert(BACKGROUND_PARCEL_VALUE);
    }

    let parcels = values
        .into_iter()
        .map(|value| NewParcel {
            value,
            label: parcel_label(definition, value),
        })
        .collect();

    Ok(AtlasIndex {
        name: definition.name.clone(),
        description: definition.description.clone(),
        content_hash: definition.content_hash.clone(),
        parcels,
        voxels: by_coordinate
            .into_iter()
            .map(|(coordinate, parcel_value)| VoxelAssignment {
                coordinate,
                parcel_value,
            })
            .collect(),
        unlabeled_mask_voxels,
    })
}

fn parcel_label(definition: &AtlasDefinition, value: i32) -> String {
    if let Some(name) = definition.label_names.get(&value) {
        return name.clone();
    }
    if value == BACKGROUND_PARCEL_VALUE {
        BACKGROUND_PARCEL_LABEL.to_owned()
    } else {
        default_parcel_label(value)
    }
}

/// Parcelwise value captured before an atlas override deletes its parcels.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedParcelwiseValue {
    /// File the value belongs to.
    pub file_id: i64,
    /// Label value of the parcel the value was attached to.
    pub parcel_value: i32,
    /// Label of that parcel.
    pub parcel_label: String,
    /// Stored scalar.
    pub value: f64,
}

/// Parcelwise row ready to be inserted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParcelwiseRow {
    /// Owning file.
    pub file_id: i64,
    /// Parcel the value belongs to.
    pub parcel_id: i64,
    /// Reduced scalar.
    pub value: f64,
}

/// Captured parcelwise rows keyed by file, returned from an atlas override.
pub type RecoveryDictionary = BTreeMap<i64, Vec<CapturedParcelwiseValue>>;

/// Result of splitting captured rows against the rebuilt parcels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReattachmentPlan {
    /// Rows whose parcel value and label both survive.
    pub rows: Vec<ParcelwiseRow>,
    /// Rows whose parcel vanished or was relabelled.
    pub orphaned: Vec<CapturedParcelwiseValue>,
}

/// Match captured rows to rebuilt parcels on both value and label.
///
/// A parcel that keeps its value but changes label is treated as a different
/// region, so its rows are orphaned rather than silently reassigned.
pub fn plan_reattachment(
    captured: &[CapturedParcelwiseValue],
    new_parcels: &[Parcel],
) -> ReattachmentPlan {
    let lookup = new_parcels
        .iter()
        .map(|parcel| ((parcel.value, parcel.label.as_str()), parcel.id))
        .collect::<BTreeMap<_, _>>();

    let mut plan = ReattachmentPlan::default();
    for row in captured {
        match lookup.get(&(row.parcel_value, row.parcel_label.as_str())) {
            Some(parcel_id) => plan.rows.push(ParcelwiseRow {
                file_id: row.file_id,
                parcel_id: *parcel_id,
                value: row.value,
            }),
            None => plan.orphaned.push(row.clone()),
        }
    }
    plan
}

/// Group captured rows by file.
pub fn recovery_dictionary(captured: &[CapturedParcelwiseValue]) -> RecoveryDictionary {
    let mut dictionary = RecoveryDictionary::new();
    for row in captured {
        dictionary.entry(row.file_id).or_default().push(row.clone());
    }
    dictionary
}

/// Outcome of an atomic atlas override.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasOverrideReport {
    /// Parcellation row after the override.
    pub parcellation: Parcellation,
    /// Every captured row keyed by file.
    pub recovery: RecoveryDictionary,
    /// Rows re-attached to rebuilt parcels.
    pub reattached: usize,
    /// Rows whose correspondence no longer holds.
    pub orphaned: Vec<CapturedParcelwiseValue>,
}
