//! Interior/edge classification of detections against a worker's sub-region.
//!
//! A detection is *edge* when any of its voxels lies within the overlap
//! distance of a tile edge shared with another worker, on either side of that
//! edge. That band is exactly the zone visible to both neighbors: every worker
//! that can see such an object classifies it edge and transports it, and the
//! global merge deduplicates the shared voxels. Anything outside the band is
//! visible to exactly one worker and is finalized locally. Sides that coincide
//! with the true image boundary never make a detection edge: nothing can be
//! split there. Evaluated once, before transport; the flag is never revised
//! afterwards.

use crate::detection::Detection;
use crate::domain::{Side, SubRegion};

/// Classify a detection (in coordinates local to the region's outer tile).
pub fn is_edge_detection(det: &Detection, region: &SubRegion) -> bool {
    let ndim = region.ndim();
    debug_assert_eq!(det.ndim(), ndim);

    // Band extents in local coordinates. On a side with a neighbor the outer
    // tile extends the full overlap, so the lower band is
    // [0, 2 * overlap) and the upper band is [inner_len - overlap, outer_len).
    let overlap = region.overlap();
    let lower_band_end: Vec<i64> = (0..ndim)
        .map(|a| {
            (region.inner()[a].start - region.outer()[a].start + overlap[a]) as i64
        })
        .collect();
    let upper_band_start: Vec<i64> = (0..ndim)
        .map(|a| {
            (region.inner()[a].end - region.outer()[a].start) as i64 - overlap[a] as i64
        })
        .collect();

    det.voxels.iter().any(|voxel| {
        (0..ndim).any(|axis| {
            let local = voxel.pos[axis];
            (region.has_neighbor(axis, Side::Lower) && local < lower_band_end[axis])
                || (region.has_neighbor(axis, Side::Upper)
                    && local >= upper_band_start[axis])
        })
    })
}
