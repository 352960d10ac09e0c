//! Dense 3-D volumes on a template grid.

use ndarray::Array3;

use super::ImagingError;

/// Absolute tolerance used when comparing affine entries.
const AFFINE_ATOL: f64 = 1e-8;
/// Relative tolerance used when comparing affine entries.
const AFFINE_RTOL: f64 = 1e-5;

/// Voxel-to-world transform stored as the top three rows of a 4x4 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine([[f64; 4]; 3]);

impl Affine {
    /// Wrap raw affine rows.
    pub const fn new(rows: [[f64; 4]; 3]) -> Self {
        Self(rows)
    }

    /// Isotropic affine with `spacing` millimetre voxels and origin offsets.
    ///
    /// # Examples
    /// ```
    /// use lesion_bank::domain::imaging::Affine;
    ///
    /// let affine = Affine::isotropic(2.0, [-90.0, -126.0, -72.0]);
    /// assert_eq!(affine.voxel_to_world([45, 63, 36]), [0.0, 0.0, 0.0]);
    /// ```
    pub const fn isotropic(spacing: f64, origin: [f64; 3]) -> Self {
        Self([
            [spacing, 0.0, 0.0, origin[0]],
            [0.0, spacing, 0.0, origin[1]],
            [0.0, 0.0, spacing, origin[2]],
        ])
    }

    /// Raw affine rows.
    pub const fn rows(&self) -> &[[f64; 4]; 3] {
        &self.0
    }

    /// Map a voxel index to template-space millimetres.
    #[expect(
        clippy::cast_precision_loss,
        reason = "voxel indices are bounded by NIfTI's u16 dimensions"
    )]
    pub fn voxel_to_world(&self, index: [usize; 3]) -> [f64; 3] {
        let [i, j, k] = index.map(|value| value as f64);
        self.0.map(|row| row[0] * i + row[1] * j + row[2] * k + row[3])
    }

    /// Compare two affines entry-wise with `allclose` semantics.
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= AFFINE_ATOL + AFFINE_RTOL * b.abs())
    }
}

/// Integer template-space coordinate, as stored in the voxelwise index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateCoordinate {
    /// Left/right axis.
    pub x: i32,
    /// Posterior/anterior axis.
    pub y: i32,
    /// Inferior/superior axis.
    pub z: i32,
}

impl TemplateCoordinate {
    /// Build a coordinate from its components.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Round a world-space position onto the integer template lattice.
    pub fn from_world(world: [f64; 3]) -> Result<Self, ImagingError> {
        let [x, y, z] = world;
        Ok(Self {
            x: round_to_i32(x)?,
            y: round_to_i32(y)?,
            z: round_to_i32(z)?,
        })
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "range is checked before the cast"
)]
fn round_to_i32(value: f64) -> Result<i32, ImagingError> {
    let rounded = value.round();
    if rounded.is_finite() && rounded >= f64::from(i32::MIN) && rounded <= f64::from(i32::MAX) {
        Ok(rounded as i32)
    } else {
        Err(ImagingError::coordinate_out_of_range(value.to_string()))
    }
}

/// A scalar volume together with its voxel-to-world affine.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<f32>,
    affine: Affine,
}

impl Volume {
    /// Wrap voxel data and its affine.
    pub fn new(data: Array3<f32>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// Zero-filled volume on the given grid.
    pub fn zeros(shape: [usize; 3], affine: Affine) -> Self {
        Self::new(Array3::zeros(shape), affine)
    }

    /// Grid dimensions `[nx, ny, nz]`.
    pub fn shape(&self) -> [usize; 3] {
        let dims = self.data.dim();
        [dims.0, dims.1, dims.2]
    }

    /// Voxel-to-world transform.
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// Underlying voxel array.
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Value stored at `index`, or `None` when out of bounds.
    pub fn value_at(&self, index: [usize; 3]) -> Option<f32> {
        self.data.get(index).copied()
    }

    /// Overwrite the value stored at `index`.
    pub fn set(&mut self, index: [usize; 3], value: f32) -> Result<(), ImagingError> {
        let shape = self.shape();
        let slot = self
            .data
            .get_mut(index)
            .ok_or_else(|| ImagingError::index_out_of_bounds(index, shape))?;
        *slot = value;
        Ok(())
    }

    /// True when both volumes share shape and affine.
    pub fn same_grid(&self, other: &Self) -> bool {
        self.shape() == other.shape() && self.affine.approx_eq(&other.affine)
    }

    /// Iterate over voxels with a non-zero value, in index order.
    pub fn nonzero_voxels(&self) -> impl Iterator<Item = ([usize; 3], f32)> + '_ {
        self.data
            .indexed_iter()
            .filter(|(_, value)| **value != 0.0)
            .map(|((i, j, k), value)| ([i, j, k], *value))
    }
}
