//! Human-readable volume codec for tests.
//!
//! Volumes are written as JSON carrying shape, affine rows, and values in
//! row-major order, so fixtures can be built without NIfTI tooling.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::domain::imaging::{Affine, FileKind, Volume};
use crate::domain::ports::{VolumeCodec, VolumeCodecError};

#[derive(Serialize, Deserialize)]
struct JsonVolume {
    shape: [usize; 3],
    affine: [[f64; 4]; 3],
    values: Vec<f32>,
}

/// [`VolumeCodec`] backed by JSON payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonVolumeCodec;

impl JsonVolumeCodec {
    /// Encode `volume` into the payload this codec decodes.
    pub fn payload(volume: &Volume) -> Vec<u8> {
        let body = JsonVolume {
            shape: volume.shape(),
            affine: *volume.affine().rows(),
            values: volume.data().iter().copied().collect(),
        };
        match serde_json::to_vec(&body) {
            Ok(bytes) => bytes,
            Err(err) => panic!("volume payload serialises: {err}"),
        }
    }
}

impl VolumeCodec for JsonVolumeCodec {
    fn decode_volume(&self, bytes: &[u8], kind: &FileKind) -> Result<Volume, VolumeCodecError> {
        if !kind.is_volumetric() {
            return Err(VolumeCodecError::unsupported(kind.as_str()));
        }
        let body: JsonVolume = serde_json::from_slice(bytes)
            .map_err(|err| VolumeCodecError::malformed(err.to_string()))?;
        let data = Array3::from_shape_vec(body.shape, body.values)
            .map_err(|err| VolumeCodecError::malformed(err.to_string()))?;
        Ok(Volume::new(data, Affine::new(body.affine)))
    }

    fn encode_volume(&self, volume: &Volume) -> Result<Vec<u8>, VolumeCodecError> {
        Ok(Self::payload(volume))
    }

    fn encode_vector(&self, values: &[f32]) -> Result<Vec<u8>, VolumeCodecError> {
        serde_json::to_vec(values).map_err(|err| VolumeCodecError::encode(err.to_string()))
    }

    fn decode_vector(&self, bytes: &[u8]) -> Result<Vec<f64>, VolumeCodecError> {
        serde_json::from_slice(bytes).map_err(|err| VolumeCodecError::malformed(err.to_string()))
    }
}
