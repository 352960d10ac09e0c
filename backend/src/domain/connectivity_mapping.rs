//! Chunked connectivity mapping of a drawn region.
//!
//! The region's voxels are split by reduction-atlas label. Each label is one
//! chunk whose network map comes from the [`ConnectivityMapper`] port; the
//! region's map is the voxel-count-weighted mean of its chunk maps.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::Error;
use super::imaging::{ReferenceMask, Volume};
use super::port_error_mapping::map_mapper_error;
use super::ports::{ChunkRequest, ConnectivityMapper};
use super::progress::ProgressReporter;
use super::reduction::ReductionAtlas;

/// Mapping configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityMappingConfig {
    /// Normative connectome the chunk maps come from.
    pub connectome: String,
    /// Upper bound on one chunk call.
    pub chunk_timeout: Duration,
}

impl Default for ConnectivityMappingConfig {
    fn default() -> Self {
        Self {
            connectome: "GSP1000MF".to_owned(),
            chunk_timeout: Duration::from_secs(120),
        }
    }
}

/// Count region voxels per atlas label, ignoring unlabelled voxels.
pub fn chunk_voxel_counts(roi: &Volume, atlas: &ReductionAtlas) -> BTreeMap<i32, usize> {
    let mut counts = BTreeMap::new();
    for (index, _) in roi.nonzero_voxels() {
        if let Some(label) = atlas.label_at(index) {
            *counts.entry(label).or_insert(0) += 1;
        }
    }
    counts
}

/// Computes connectivity maps for drawn regions.
#[derive(Clone)]
pub struct ConnectivityMappingService {
    mapper: Arc<dyn ConnectivityMapper>,
    atlas: Arc<ReductionAtlas>,
    mask: Arc<ReferenceMask>,
    config: ConnectivityMappingConfig,
}

impl ConnectivityMappingService {
    /// Create the service.
    pub fn new(
        mapper: Arc<dyn ConnectivityMapper>,
        atlas: Arc<ReductionAtlas>,
        mask: Arc<ReferenceMask>,
        config: ConnectivityMappingConfig,
    ) -> Self {
        Self {
            mapper,
            atlas,
            mask,
            config,
        }
    }

    /// Reject regions that are off the reference grid or touch no chunk.
    pub fn validate_region(&self, roi: &Volume) -> Result<BTreeMap<i32, usize>, Error> {
        self.mask
            .ensure_same_grid(roi)
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        let counts = chunk_voxel_counts(roi, &self.atlas);
        if counts.is_empty() {
            return Err(Error::invalid_request(
                "region does not overlap any labelled atlas region",
            ));
        }
        Ok(counts)
    }

    /// Compute the connectivity map of `roi` on the reference grid.
    pub async fn compute(
        &self,
        roi: &Volume,
        progress: &dyn ProgressReporter,
    ) -> Result<Volume, Error> {
        let counts = self.validate_region(roi)?;
        let total = counts.len();
        let mut accumulated = vec![0.0_f64; self.mask.len()];
        let mut weight = 0.0_f64;

        for (position, (label, voxels)) in counts.iter().enumerate() {
            let chunk = position + 1;
            progress
                .report(
                    percent_of(position, total),
                    &format!("Processing chunk {chunk} of {total}"),
                )
                .await;
            let map = self.chunk_map(*label).await?;
            if map.len() != accumulated.len() {
                return Err(Error::internal(format!(
                    "chunk {label} map has {} values, expected {}",
                    map.len(),
                    accumulated.len()
                )));
            }
            let w = voxel_weight(*voxels);
            for (sum, value) in accumulated.iter_mut().zip(&map) {
                *sum += w * value;
            }
            weight += w;
            debug!(label, voxels, chunk, total, "chunk mapped");
        }
        progress.report(100.0, "Connectivity map assembled.").await;

        let mean = accumulated
            .into_iter()
            .map(|sum| sum / weight)
            .collect::<Vec<_>>();
        info!(
            connectome = %self.config.connectome,
            chunks = total,
            "connectivity map computed"
        );
        self.mask
            .scatter(&mean)
            .map_err(|err| Error::internal(err.to_string()))
    }

    async fn chunk_map(&self, label: i32) -> Result<Vec<f64>, Error> {
        let request = ChunkRequest {
            connectome: self.config.connectome.clone(),
            label,
        };
        match tokio::time::timeout(self.config.chunk_timeout, self.mapper.chunk_map(&request))
            .await
        {
            Ok(result) => result.map_err(map_mapper_error),
            Err(_) => Err(Error::service_unavailable(format!(
                "connectivity mapping of chunk {label} timed out after {}s",
                self.config.chunk_timeout.as_secs()
            ))),
        }
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "chunk voxel counts are bounded by the template grid"
)]
fn voxel_weight(voxels: usize) -> f64 {
    voxels as f64
}

#[expect(
    clippy::cast_precision_loss,
    reason = "chunk counts are bounded by the atlas label count"
)]
fn percent_of(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}
