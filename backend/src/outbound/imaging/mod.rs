//! NIfTI and NumPy codecs implementing the `VolumeCodec` port.
//!
//! The `nifti` crate reads and writes through paths, so payloads are staged
//! in a private temporary directory accessed through `cap_std`.

mod header;

use std::io;
use std::path::Path;

use cap_std::{ambient_authority, fs::Dir};
use ndarray::{Array1, Array3, Axis, Ix3};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use tempfile::TempDir;

use self::header::{affine_from_header, header_for};
use crate::domain::imaging::{FileKind, Volume};
use crate::domain::ports::{VolumeCodec, VolumeCodecError};

/// Codec for `.nii`/`.nii.gz` volumes and 1-D `.npy` vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiVolumeCodec;

impl NiftiVolumeCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self
    }
}

struct Scratch {
    dir: TempDir,
    handle: Dir,
}

impl Scratch {
    fn new() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let handle = Dir::open_ambient_dir(dir.path(), ambient_authority())?;
        Ok(Self { dir, handle })
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }
}

fn malformed(error: impl std::fmt::Display) -> VolumeCodecError {
    VolumeCodecError::malformed(error.to_string())
}

fn encode_failed(error: impl std::fmt::Display) -> VolumeCodecError {
    VolumeCodecError::encode(error.to_string())
}

/// Drop trailing singleton dimensions so 4-D single-frame images read as 3-D.
fn into_volume_data(data: ndarray::ArrayD<f32>) -> Result<Array3<f32>, VolumeCodecError> {
    let mut data = data;
    while data.ndim() > 3 && data.shape().last() == Some(&1) {
        let last = Axis(data.ndim() - 1);
        data = data.index_axis_move(last, 0);
    }
    let shape = data.shape().to_vec();
    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|_| malformed(format!("expected a 3-D volume, found shape {shape:?}")))?;
    Ok(data.as_standard_layout().into_owned())
}

fn staged_name(kind: &FileKind) -> Result<&'static str, VolumeCodecError> {
    match kind {
        FileKind::NiftiGz => Ok("volume.nii.gz"),
        FileKind::Nifti => Ok("volume.nii"),
        other => Err(VolumeCodecError::unsupported(other.as_str())),
    }
}

impl VolumeCodec for NiftiVolumeCodec {
    fn decode_volume(&self, bytes: &[u8], kind: &FileKind) -> Result<Volume, VolumeCodecError> {
        let name = staged_name(kind)?;
        let scratch = Scratch::new().map_err(malformed)?;
        scratch.handle.write(name, bytes).map_err(malformed)?;

        let object = ReaderOptions::new()
            .read_file(scratch.path(name))
            .map_err(malformed)?;
        let affine = affine_from_header(object.header());
        let data = object
            .into_volume()
            .into_ndarray::<f32>()
            .map_err(malformed)?;
        Ok(Volume::new(into_volume_data(data)?, affine))
    }

    fn encode_volume(&self, volume: &Volume) -> Result<Vec<u8>, VolumeCodecError> {
        let name = "volume.nii.gz";
        let scratch = Scratch::new().map_err(encode_failed)?;
        let header = header_for(volume.affine());
        WriterOptions::new(scratch.path(name))
            .reference_header(&header)
            .write_nifti(volume.data())
            .map_err(encode_failed)?;
        scratch.handle.read(Path::new(name)).map_err(encode_failed)
    }

    fn encode_vector(&self, values: &[f32]) -> Result<Vec<u8>, VolumeCodecError> {
        let mut bytes = Vec::new();
        Array1::from(values.to_vec())
            .write_npy(&mut bytes)
            .map_err(encode_failed)?;
        Ok(bytes)
    }

    fn decode_vector(&self, bytes: &[u8]) -> Result<Vec<f64>, VolumeCodecError> {
        match Array1::<f32>::read_npy(bytes) {
            Ok(values) => Ok(values.iter().map(|value| f64::from(*value)).collect()),
            Err(_) => Array1::<f64>::read_npy(bytes)
                .map(Array1::into_raw_vec)
                .map_err(malformed),
        }
    }
}
