//! Imaging primitives: template-grid volumes, masks, file kinds, and
//! coordinate-space detection.
//!
//! Everything here is pure and synchronous. Decoding bytes into a [`Volume`]
//! is the job of the `VolumeCodec` port.

use serde::{Deserialize, Serialize};

mod file_kind;
mod mask;
mod volume;

pub use file_kind::FileKind;
pub use mask::ReferenceMask;
pub use volume::{Affine, TemplateCoordinate, Volume};

use crate::domain::ports::define_port_error;

define_port_error! {
    /// Errors raised by pure imaging operations.
    pub enum ImagingError {
        /// Two volumes were expected to share a template grid.
        GridMismatch { expected: [usize; 3], actual: [usize; 3] } =>
            "image grid {actual:?} does not match the reference grid {expected:?}",
        /// A voxel index fell outside the volume.
        IndexOutOfBounds { index: [usize; 3], shape: [usize; 3] } =>
            "voxel index {index:?} is outside grid {shape:?}",
        /// A masked vector had the wrong length.
        LengthMismatch { expected: usize, actual: usize } =>
            "masked vector has {actual} values but the mask has {expected} voxels",
        /// A world coordinate could not be represented on the integer lattice.
        CoordinateOutOfRange { value: String } =>
            "world coordinate {value} is outside the representable range",
        /// The reference mask contained no voxels.
        EmptyMask => "reference mask contains no voxels",
    }
}

/// Standard template spaces recognised by shape and affine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinateSpace {
    /// MNI152 at 2mm isotropic resolution.
    #[serde(rename = "2mm")]
    Mni152TwoMm,
    /// MNI152 at 1mm isotropic resolution.
    #[serde(rename = "1mm")]
    Mni152OneMm,
    /// No known template matched.
    #[serde(rename = "unknown")]
    Unknown,
}

const MNI_2MM_SHAPE: [usize; 3] = [91, 109, 91];
const MNI_1MM_SHAPE: [usize; 3] = [182, 218, 182];

const MNI_2MM_AFFINES: [Affine; 2] = [
    Affine::new([
        [2.0, 0.0, 0.0, -90.0],
        [0.0, 2.0, 0.0, -126.0],
        [0.0, 0.0, 2.0, -72.0],
    ]),
    Affine::new([
        [-2.0, 0.0, 0.0, 90.0],
        [0.0, 2.0, 0.0, -126.0],
        [0.0, 0.0, 2.0, -72.0],
    ]),
];

const MNI_1MM_AFFINES: [Affine; 2] = [
    Affine::new([
        [1.0, 0.0, 0.0, -91.0],
        [0.0, 1.0, 0.0, -126.0],
        [0.0, 0.0, 1.0, -72.0],
    ]),
    Affine::new([
        [-1.0, 0.0, 0.0, 91.0],
        [0.0, 1.0, 0.0, -126.0],
        [0.0, 0.0, 1.0, -72.0],
    ]),
];

impl CoordinateSpace {
    /// Detect the template space of a grid.
    ///
    /// # Examples
    /// ```
    /// use lesion_bank::domain::imaging::{Affine, CoordinateSpace};
    ///
    /// let affine = Affine::isotropic(2.0, [-90.0, -126.0, -72.0]);
    /// assert_eq!(
    ///     CoordinateSpace::detect([91, 109, 91], &affine),
    ///     CoordinateSpace::Mni152TwoMm
    /// );
    /// assert_eq!(CoordinateSpace::detect([10, 10, 10], &affine), CoordinateSpace::Unknown);
    /// ```
    pub fn detect(shape: [usize; 3], affine: &Affine) -> Self {
        let matches_any = |candidates: &[Affine]| candidates.iter().any(|c| affine.approx_eq(c));

        if shape == MNI_2MM_SHAPE && matches_any(&MNI_2MM_AFFINES) {
            Self::Mni152TwoMm
        } else if shape == MNI_1MM_SHAPE && matches_any(&MNI_1MM_AFFINES) {
            Self::Mni152OneMm
        } else {
            Self::Unknown
        }
    }

    /// Stored label for this space.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mni152TwoMm => "2mm",
            Self::Mni152OneMm => "1mm",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored label, defaulting to [`CoordinateSpace::Unknown`].
    pub fn from_label(label: &str) -> Self {
        match label {
            "2mm" => Self::Mni152TwoMm,
            "1mm" => Self::Mni152OneMm,
            _ => Self::Unknown,
        }
    }
}
