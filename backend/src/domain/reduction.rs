//! Parcelwise reduction of template-grid volumes.

use std::collections::BTreeMap;

use super::imaging::{ImagingError, Volume};
use super::parcellation::{BACKGROUND_PARCEL_VALUE, Parcel, label_value};
use super::ReductionStrategy;

/// Label volume used to reduce uploads, with the parcellation it belongs to.
#[derive(Debug, Clone)]
pub struct ReductionAtlas {
    parcellation_name: String,
    labels: Volume,
}

impl ReductionAtlas {
    /// Pair a label volume with its registered parcellation name.
    pub fn new(parcellation_name: impl Into<String>, labels: Volume) -> Self {
        Self {
            parcellation_name: parcellation_name.into(),
            labels,
        }
    }

    /// Registered parcellation name.
    pub fn parcellation_name(&self) -> &str {
        &self.parcellation_name
    }

    /// Integer label volume.
    pub fn labels(&self) -> &Volume {
        &self.labels
    }

    /// Label value at `index`, with background reported as `None`.
    pub fn label_at(&self, index: [usize; 3]) -> Option<i32> {
        self.labels
            .value_at(index)
            .map(label_value)
            .filter(|value| *value != 0)
    }
}

/// Reduce `volume` to one scalar per atlas label.
///
/// Every voxel carrying a non-background label contributes, including
/// voxels whose value is zero, so `mean` divides by the parcel's full voxel
/// count.
///
/// # Examples
/// ```
/// use lesion_bank::domain::imaging::{Affine, Volume};
/// use lesion_bank::domain::reduction::{ReductionAtlas, reduce_by_parcel};
/// use lesion_bank::domain::ReductionStrategy;
///
/// let affine = Affine::isotropic(2.0, [0.0; 3]);
/// let mut labels = Volume::zeros([2, 1, 1], affine);
/// labels.set([0, 0, 0], 1.0)?;
/// labels.set([1, 0, 0], 2.0)?;
/// let atlas = ReductionAtlas::new("toy", labels);
/// let mut image = Volume::zeros([2, 1, 1], affine);
/// image.set([0, 0, 0], 5.0)?;
///
/// let reduced = reduce_by_parcel(&image, &atlas, ReductionStrategy::Mean)?;
/// assert_eq!(reduced.get(&1), Some(&5.0));
/// assert_eq!(reduced.get(&2), Some(&0.0));
/// # Ok::<(), lesion_bank::domain::imaging::ImagingError>(())
/// ```
pub fn reduce_by_parcel(
    volume: &Volume,
    atlas: &ReductionAtlas,
    strategy: ReductionStrategy,
) -> Result<BTreeMap<i32, f64>, ImagingError> {
    if !volume.same_grid(atlas.labels()) {
        return Err(ImagingError::grid_mismatch(
            atlas.labels().shape(),
            volume.shape(),
        ));
    }

    let mut totals: BTreeMap<i32, (f64, u32)> = BTreeMap::new();
    for (index, raw_label) in atlas.labels().nonzero_voxels() {
        let label = label_value(raw_label);
        if label == 0 {
            continue;
        }
        let value = volume
            .value_at(index)
            .ok_or_else(|| ImagingError::index_out_of_bounds(index, volume.shape()))?;
        let entry = totals.entry(label).or_insert((0.0, 0));
        entry.0 += f64::from(value);
        entry.1 += 1;
    }

    Ok(totals
        .into_iter()
        .map(|(label, (sum, count))| {
            let reduced = match strategy {
                ReductionStrategy::Sum => sum,
                ReductionStrategy::Mean => sum / f64::from(count.max(1)),
            };
            (label, reduced)
        })
        .collect())
}

/// Parcelwise value resolved to a stored parcel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParcelValue {
    /// Stored parcel id.
    pub parcel_id: i64,
    /// Reduced scalar.
    pub value: f64,
}

/// Reduced values resolved against stored parcels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedReduction {
    /// Dense vector in ascending parcel value order.
    pub dense: Vec<f32>,
    /// Non-zero values only.
    pub sparse: Vec<ParcelValue>,
    /// Atlas labels with no stored parcel.
    pub unknown_labels: Vec<i32>,
}

/// Resolve `reduced` against the parcels of the reduction parcellation.
///
/// The dense vector holds one entry per stored non-background parcel; the
/// sparse rows drop zeros so an all-zero parcel is never persisted.
#[expect(
    clippy::cast_possible_truncation,
    reason = "parcel vectors are stored as float32 arrays"
)]
pub fn resolve_reduction(reduced: &BTreeMap<i32, f64>, parcels: &[Parcel]) -> ResolvedReduction {
    let mut ordered = parcels
        .iter()
        .filter(|parcel| parcel.value != BACKGROUND_PARCEL_VALUE)
        .collect::<Vec<_>>();
    ordered.sort_by_key(|parcel| parcel.value);

    let mut resolved = ResolvedReduction::default();
    for parcel in &ordered {
        let value = reduced.get(&parcel.value).copied().unwrap_or_default();
        resolved.dense.push(value as f32);
        if value != 0.0 {
            resolved.sparse.push(ParcelValue {
                parcel_id: parcel.id,
                value,
            });
        }
    }
    resolved.unknown_labels = reduced
        .keys()
        .filter(|label| !ordered.iter().any(|parcel| parcel.value == **label))
        .copied()
        .collect();
    resolved
}
