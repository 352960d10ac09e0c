//! Driven port for the external chunked connectivity mapping procedure.

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised by connectivity mapping adapters.
    pub enum ConnectivityMapperError {
        /// No map is available for the requested chunk.
        MissingChunk { connectome: String, label: i32 } =>
            "no connectivity map for chunk {label} of {connectome}",
        /// The mapping backend failed.
        Failed { message: String } => "connectivity mapping failed: {message}",
    }
}

/// One atlas-region chunk to map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Normative connectome.
    pub connectome: String,
    /// Reduction atlas label of the chunk.
    pub label: i32,
}

/// Port returning the masked network map of one chunk.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectivityMapper: Send + Sync {
    /// Masked connectivity vector seeded from the chunk's region.
    async fn chunk_map(&self, request: &ChunkRequest) -> Result<Vec<f64>, ConnectivityMapperError>;
}
