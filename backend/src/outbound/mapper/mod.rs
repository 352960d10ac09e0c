//! Connectivity mapper reading precomputed chunk maps from blob storage.
//!
//! Each reduction-atlas chunk of a connectome has one masked network map
//! stored as a 1-D `.npy` at `connectomes/{connectome}/chunk-{label}.npy`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::ports::{
    BlobStore, BlobStoreError, ChunkRequest, ConnectivityMapper, ConnectivityMapperError,
    VolumeCodec,
};
use crate::domain::storage_keys::connectome_chunk_key;

/// Mapper serving chunk maps computed offline.
#[derive(Clone)]
pub struct PrecomputedChunkMapper {
    blobs: Arc<dyn BlobStore>,
    codec: Arc<dyn VolumeCodec>,
}

impl PrecomputedChunkMapper {
    /// Read chunk maps from `blobs`, decoding them with `codec`.
    pub fn new(blobs: Arc<dyn BlobStore>, codec: Arc<dyn VolumeCodec>) -> Self {
        Self { blobs, codec }
    }
}

#[async_trait]
impl ConnectivityMapper for PrecomputedChunkMapper {
    async fn chunk_map(&self, request: &ChunkRequest) -> Result<Vec<f64>, ConnectivityMapperError> {
        let key = connectome_chunk_key(&request.connectome, request.label);
        let bytes = self.blobs.get(&key).await.map_err(|err| match err {
            BlobStoreError::NotFound { .. } => {
                ConnectivityMapperError::missing_chunk(request.connectome.as_str(), request.label)
            }
            other => ConnectivityMapperError::failed(other.to_string()),
        })?;
        debug!(%key, size = bytes.len(), "loaded chunk map");

        let codec = Arc::clone(&self.codec);
        tokio::task::spawn_blocking(move || codec.decode_vector(&bytes))
            .await
            .map_err(|err| ConnectivityMapperError::failed(err.to_string()))?
            .map_err(|err| ConnectivityMapperError::failed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemoryBlobStore, JsonVolumeCodec};
    use rstest::{fixture, rstest};

    struct Harness {
        blobs: Arc<InMemoryBlobStore>,
        mapper: PrecomputedChunkMapper,
    }

    #[fixture]
    fn harness() -> Harness {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let mapper = PrecomputedChunkMapper::new(blobs.clone(), Arc::new(JsonVolumeCodec));
        Harness { blobs, mapper }
    }

    fn request(label: i32) -> ChunkRequest {
        ChunkRequest {
            connectome: "GSP1000MF".to_owned(),
            label,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn reads_the_chunk_for_the_label(harness: Harness) {
        let payload = JsonVolumeCodec.encode_vector(&[0.5, -0.25]).expect("encode");
        harness
            .blobs
            .put("connectomes/gsp1000mf/chunk-3.npy", payload)
            .await
            .expect("seed chunk");

        let map = harness.mapper.chunk_map(&request(3)).await.expect("chunk map");

        assert_eq!(map, vec![0.5, -0.25]);
    }

    #[rstest]
    #[tokio::test]
    async fn absent_chunks_are_reported_by_label(harness: Harness) {
        let error = harness.mapper.chunk_map(&request(8)).await.expect_err("missing");
        assert_eq!(error, ConnectivityMapperError::missing_chunk("GSP1000MF", 8));
    }

    #[rstest]
    #[tokio::test]
    async fn undecodable_chunks_fail(harness: Harness) {
        harness
            .blobs
            .put("connectomes/gsp1000mf/chunk-1.npy", b"junk".to_vec())
            .await
            .expect("seed chunk");

        let error = harness.mapper.chunk_map(&request(1)).await.expect_err("junk");
        assert!(matches!(error, ConnectivityMapperError::Failed { .. }));
    }
}
