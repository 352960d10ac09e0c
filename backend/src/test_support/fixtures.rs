//! Toy template grids shared by tests.
//!
//! The toy grid is a 2x1x1 volume with 2 mm voxels whose atlas labels the
//! first voxel `1` ("A") and the second `2` ("B").

use std::collections::BTreeMap;

use crate::domain::imaging::{Affine, ReferenceMask, Volume};
use crate::domain::parcellation::AtlasDefinition;
use crate::domain::reduction::ReductionAtlas;

/// Name the toy atlas is registered under.
pub const TOY_ATLAS: &str = "toy";

/// Affine of the toy grid.
pub fn toy_affine() -> Affine {
    Affine::isotropic(2.0, [0.0; 3])
}

/// Toy-grid volume holding `values` along x.
pub fn toy_volume(values: [f32; 2]) -> Volume {
    let mut volume = Volume::zeros([2, 1, 1], toy_affine());
    for (x, value) in values.into_iter().enumerate() {
        if let Err(err) = volume.set([x, 0, 0], value) {
            panic!("toy voxel in bounds: {err}");
        }
    }
    volume
}

/// Mask covering both toy voxels.
pub fn toy_mask() -> ReferenceMask {
    match ReferenceMask::from_volume(&toy_volume([1.0, 1.0])) {
        Ok(mask) => mask,
        Err(err) => panic!("toy mask is non-empty: {err}"),
    }
}

/// Toy atlas definition with parcels `{1: A, 2: B}`.
pub fn toy_atlas_definition(content_hash: &str) -> AtlasDefinition {
    AtlasDefinition {
        name: TOY_ATLAS.to_owned(),
        description: "two-voxel test atlas".to_owned(),
        labels: toy_volume([1.0, 2.0]),
        label_names: BTreeMap::from([(1, "A".to_owned()), (2, "B".to_owned())]),
        content_hash: content_hash.to_owned(),
    }
}

/// Reduction atlas over the toy labels.
pub fn toy_reduction_atlas() -> ReductionAtlas {
    ReductionAtlas::new(TOY_ATLAS, toy_volume([1.0, 2.0]))
}
