//! Reference brain mask used to vectorise volumes for comparison.

use super::{Affine, ImagingError, Volume};

/// Ordered voxel set of a reference mask on a fixed template grid.
///
/// Every corpus image and every query image is flattened through the same
/// mask, so vectors produced by [`ReferenceMask::extract`] are comparable
/// element by element.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMask {
    shape: [usize; 3],
    affine: Affine,
    voxels: Vec<[usize; 3]>,
}

impl ReferenceMask {
    /// Build a mask from the voxels of `volume` whose value is positive.
    ///
    /// # Examples
    /// ```
    /// use lesion_bank::domain::imaging::{Affine, ReferenceMask, Volume};
    ///
    /// let mut volume = Volume::zeros([2, 1, 1], Affine::isotropic(2.0, [0.0; 3]));
    /// volume.set([1, 0, 0], 1.0)?;
    /// let mask = ReferenceMask::from_volume(&volume)?;
    /// assert_eq!(mask.voxels(), &[[1, 0, 0]]);
    /// # Ok::<(), lesion_bank::domain::imaging::ImagingError>(())
    /// ```
    pub fn from_volume(volume: &Volume) -> Result<Self, ImagingError> {
        let voxels = volume
            .nonzero_voxels()
            .filter(|(_, value)| *value > 0.0)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        if voxels.is_empty() {
            return Err(ImagingError::EmptyMask);
        }
        Ok(Self {
            shape: volume.shape(),
            affine: *volume.affine(),
            voxels,
        })
    }

    /// Grid shape the mask was defined on.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Grid affine the mask was defined on.
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// Voxel indices inside the mask, in index order.
    pub fn voxels(&self) -> &[[usize; 3]] {
        &self.voxels
    }

    /// Number of voxels inside the mask.
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    /// Whether the mask is empty (never true for a constructed mask).
    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// Fail unless `volume` sits on the mask's grid.
    pub fn ensure_same_grid(&self, volume: &Volume) -> Result<(), ImagingError> {
        if volume.shape() == self.shape && volume.affine().approx_eq(&self.affine) {
            Ok(())
        } else {
            Err(ImagingError::grid_mismatch(self.shape, volume.shape()))
        }
    }

    /// Flatten `volume` into the masked vector.
    pub fn extract(&self, volume: &Volume) -> Result<Vec<f64>, ImagingError> {
        self.ensure_same_grid(volume)?;
        self.voxels
            .iter()
            .map(|index| {
                volume
                    .value_at(*index)
                    .map(f64::from)
                    .ok_or_else(|| ImagingError::index_out_of_bounds(*index, self.shape))
            })
            .collect()
    }

    /// Scatter a masked vector back onto the template grid.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "volumes are stored as f32, matching the NIfTI payloads"
    )]
    pub fn scatter(&self, values: &[f64]) -> Result<Volume, ImagingError> {
        if values.len() != self.voxels.len() {
            return Err(ImagingError::length_mismatch(self.voxels.len(), values.len()));
        }
        let mut volume = Volume::zeros(self.shape, self.affine);
        for (index, value) in self.voxels.iter().zip(values) {
            volume.set(*index, *value as f32)?;
        }
        Ok(volume)
    }
}
