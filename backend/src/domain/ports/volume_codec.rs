//! Driven port for decoding and encoding imaging payloads.

use super::define_port_error;
use crate::domain::imaging::{FileKind, Volume};

define_port_error! {
    /// Errors raised by volume codecs.
    pub enum VolumeCodecError {
        /// The file kind has no volumetric decoder.
        Unsupported { kind: String } => "unsupported file kind for decoding: {kind}",
        /// The payload could not be parsed.
        Malformed { message: String } => "malformed imaging payload: {message}",
        /// The payload could not be produced.
        Encode { message: String } => "failed to encode imaging payload: {message}",
    }
}

/// Port for imaging payload conversion.
///
/// Conversions are CPU bound; async callers run them on the blocking pool.
#[cfg_attr(test, mockall::automock)]
pub trait VolumeCodec: Send + Sync {
    /// Decode a 3-D volume from `bytes` of the given kind.
    fn decode_volume(&self, bytes: &[u8], kind: &FileKind) -> Result<Volume, VolumeCodecError>;

    /// Encode a volume as gzipped NIfTI.
    fn encode_volume(&self, volume: &Volume) -> Result<Vec<u8>, VolumeCodecError>;

    /// Encode a float32 vector as a `.npy` array.
    fn encode_vector(&self, values: &[f32]) -> Result<Vec<u8>, VolumeCodecError>;

    /// Decode a `.npy` array into a float vector.
    fn decode_vector(&self, bytes: &[u8]) -> Result<Vec<f64>, VolumeCodecError>;
}
