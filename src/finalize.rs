//! Catalog finalization: ordering, identifiers, and boundary flags.
//!
//! Concatenates the per-worker interior lists with the fused edge list, sorts
//! by the configured key, and assigns sequential global identifiers 1..N. The
//! edge flag recomputed here is relative to the true global image boundary and
//! is informational only — it never feeds back into the merge.

use tracing::info;

use crate::config::SortKey;
use crate::detection::Detection;
use crate::domain::ImageDomain;
use crate::stats::GlobalThreshold;

/// The finalized global catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Detections in sorted order, ids 1..N assigned.
    pub detections: Vec<Detection>,
    /// The threshold broadcast during this run, when one was pooled globally.
    pub threshold: Option<GlobalThreshold>,
}

/// Stable sort by the configured key.
pub fn sort_detections(detections: &mut [Detection], key: SortKey) {
    match key {
        SortKey::Position => {
            detections.sort_by_key(|d| d.global_min_corner());
        }
        SortKey::PeakFlux => {
            detections.sort_by(|a, b| {
                b.peak
                    .partial_cmp(&a.peak)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        SortKey::VoxelCount => {
            detections.sort_by(|a, b| b.voxel_count().cmp(&a.voxel_count()));
        }
    }
}

/// Build the final catalog from interior and fused edge detections.
///
/// All inputs must already be in global coordinates with offsets applied.
pub fn finalize_catalog(
    interior: Vec<Detection>,
    fused_edge: Vec<Detection>,
    domain: &ImageDomain,
    key: SortKey,
) -> Vec<Detection> {
    let mut all = interior;
    all.extend(fused_edge);
    sort_detections(&mut all, key);

    for (index, det) in all.iter_mut().enumerate() {
        det.id = Some(index as u32 + 1);
        det.on_image_boundary = det
            .voxels
            .iter()
            .any(|voxel| domain.on_boundary(&voxel.pos));
    }

    info!(objects = all.len(), "catalog finalized");
    all
}
