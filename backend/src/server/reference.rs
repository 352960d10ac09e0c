//! Loading of the reference grid and reduction atlas at startup.

use std::path::Path;

use cap_std::{ambient_authority, fs::Dir};

use super::StartupError;
use crate::domain::imaging::{FileKind, ReferenceMask, Volume};
use crate::domain::ports::VolumeCodec;
use crate::domain::reduction::ReductionAtlas;

/// Read `path` through a capability handle on its parent directory.
pub fn read_file(path: &Path) -> Result<Vec<u8>, StartupError> {
    let failure = |message: String| StartupError::Reference {
        path: path.display().to_string(),
        message,
    };
    let name = path
        .file_name()
        .ok_or_else(|| failure("path has no file name".to_owned()))?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| failure(err.to_string()))?;
    dir.read(name).map_err(|err| failure(err.to_string()))
}

/// Decode the NIfTI volume at `path`.
pub fn load_volume(path: &Path, codec: &dyn VolumeCodec) -> Result<Volume, StartupError> {
    let bytes = read_file(path)?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    codec
        .decode_volume(&bytes, &FileKind::from_filename(&filename))
        .map_err(|err| StartupError::Reference {
            path: path.display().to_string(),
            message: err.to_string(),
        })
}

/// Reference brain mask stored at `path`.
pub fn load_reference_mask(
    path: &Path,
    codec: &dyn VolumeCodec,
) -> Result<ReferenceMask, StartupError> {
    let volume = load_volume(path, codec)?;
    ReferenceMask::from_volume(&volume).map_err(|err| StartupError::Reference {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

/// Reduction atlas stored at `path`, registered as `name`, on `mask`'s grid.
pub fn load_reduction_atlas(
    path: &Path,
    name: &str,
    mask: &ReferenceMask,
    codec: &dyn VolumeCodec,
) -> Result<ReductionAtlas, StartupError> {
    let labels = load_volume(path, codec)?;
    mask.ensure_same_grid(&labels)
        .map_err(|err| StartupError::Reference {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
    Ok(ReductionAtlas::new(name, labels))
}
