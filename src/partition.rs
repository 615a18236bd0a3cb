//! Subdivision of the image domain into per-worker sub-regions.
//!
//! Each axis is divided into equal-width (within one pixel) segments, and ranks
//! map to grid cells in row-major index order. The overlap margin on an axis is
//! the maximum of the requested base overlap and every named padding
//! requirement from downstream features, applied only where the axis is
//! actually subdivided and clipped at the true image boundary. Any raise of the
//! requested overlap is reported back to the caller, never applied silently.

use tracing::{debug, info};

use crate::config::Padding;
use crate::domain::{AxisRange, ImageDomain, Rank, SubRegion};
use crate::error::SearchError;

/// Record of an overlap raise forced by a padding requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapAdjustment {
    pub axis: usize,
    pub requested: usize,
    pub effective: usize,
    /// Name of the padding feature that forced the raise.
    pub forced_by: String,
}

/// Result of partitioning: one sub-region per worker rank plus the effective
/// overlap actually applied and any adjustments made to the request.
#[derive(Debug, Clone)]
pub struct Partition {
    pub regions: Vec<SubRegion>,
    pub effective_overlap: Vec<usize>,
    pub adjustments: Vec<OverlapAdjustment>,
}

impl Partition {
    /// Ranks whose outer (overlap-extended) tiles cover the given cube-local
    /// position. Interior positions map to one rank; positions inside an
    /// overlap band map to every rank that can see them.
    pub fn affected_ranks(&self, pos: &[usize]) -> Vec<Rank> {
        self.regions
            .iter()
            .filter(|r| r.outer_contains(pos))
            .map(|r| r.rank())
            .collect()
    }
}

/// Divide `extent` into `count` equal-width segments, within one pixel.
/// The remainder is spread over the leading segments.
fn split_axis(extent: usize, count: usize) -> Vec<AxisRange> {
    let base = extent / count;
    let remainder = extent % count;
    let mut ranges = Vec::with_capacity(count);
    let mut start = 0;
    for i in 0..count {
        let width = base + usize::from(i < remainder);
        ranges.push(AxisRange::new(start, start + width));
        start += width;
    }
    ranges
}

/// Compute one sub-region per worker rank.
///
/// Fails with [`SearchError::Configuration`] when the axis specifications are
/// malformed or the grid product does not equal `worker_count`, and with
/// [`SearchError::Domain`] when a computed sub-region holds no valid pixels
/// (more segments than pixels on an axis).
pub fn partition_domain(
    domain: &ImageDomain,
    subdivisions: &[usize],
    requested_overlap: &[usize],
    paddings: &[Padding],
    worker_count: usize,
) -> Result<Partition, SearchError> {
    let ndim = domain.ndim();
    if subdivisions.len() != ndim {
        return Err(SearchError::Configuration(format!(
            "subdivision grid has {} axes but the image has {ndim}",
            subdivisions.len()
        )));
    }
    if requested_overlap.len() != ndim {
        return Err(SearchError::Configuration(format!(
            "overlap specification has {} axes but the image has {ndim}",
            requested_overlap.len()
        )));
    }
    if let Some(axis) = subdivisions.iter().position(|&n| n == 0) {
        return Err(SearchError::Configuration(format!(
            "zero subdivisions requested on axis {axis}"
        )));
    }
    let grid_cells: usize = subdivisions.iter().product();
    if grid_cells != worker_count {
        return Err(SearchError::Configuration(format!(
            "subdivision grid {subdivisions:?} yields {grid_cells} cells but {worker_count} workers are available"
        )));
    }
    for pad in paddings {
        if pad.cells.len() != ndim {
            return Err(SearchError::Configuration(format!(
                "padding requirement '{}' has {} axes but the image has {ndim}",
                pad.feature,
                pad.cells.len()
            )));
        }
    }

    // Effective overlap: max(requested, all paddings), only on subdivided axes.
    let mut effective_overlap = Vec::with_capacity(ndim);
    let mut adjustments = Vec::new();
    for axis in 0..ndim {
        if subdivisions[axis] <= 1 {
            // A single segment spans the whole axis and needs no overlap.
            effective_overlap.push(0);
            continue;
        }
        let mut effective = requested_overlap[axis];
        let mut forced_by = None;
        for pad in paddings {
            if pad.cells[axis] > effective {
                effective = pad.cells[axis];
                forced_by = Some(pad.feature.clone());
            }
        }
        if let Some(feature) = forced_by {
            info!(
                axis,
                requested = requested_overlap[axis],
                effective,
                feature = %feature,
                "overlap raised to satisfy padding requirement"
            );
            adjustments.push(OverlapAdjustment {
                axis,
                requested: requested_overlap[axis],
                effective,
                forced_by: feature,
            });
        }
        effective_overlap.push(effective);
    }

    // Per-axis segment lists, then the row-major cross product.
    let mut axis_segments = Vec::with_capacity(ndim);
    for axis in 0..ndim {
        axis_segments.push(split_axis(domain.extents()[axis], subdivisions[axis]));
    }

    let mut regions = Vec::with_capacity(worker_count);
    for cell in 0..grid_cells {
        // Row-major: last axis varies fastest.
        let mut grid_pos = vec![0usize; ndim];
        let mut rem = cell;
        for axis in (0..ndim).rev() {
            grid_pos[axis] = rem % subdivisions[axis];
            rem /= subdivisions[axis];
        }

        let rank = Rank(cell as u16);
        let mut inner = Vec::with_capacity(ndim);
        let mut outer = Vec::with_capacity(ndim);
        for axis in 0..ndim {
            let seg = axis_segments[axis][grid_pos[axis]];
            if seg.is_empty() {
                return Err(SearchError::Domain(format!(
                    "{rank} has no valid pixels on axis {axis}: {} segments over extent {}",
                    subdivisions[axis],
                    domain.extents()[axis]
                )));
            }
            let margin = effective_overlap[axis];
            // Overlap is clipped at the true image boundary.
            let lo = seg.start.saturating_sub(margin);
            let hi = (seg.end + margin).min(domain.extents()[axis]);
            inner.push(seg);
            outer.push(AxisRange::new(lo, hi));
        }

        debug!(%rank, ?grid_pos, ?inner, ?outer, "sub-region defined");
        regions.push(SubRegion::new(
            rank,
            grid_pos,
            subdivisions.to_vec(),
            inner,
            outer,
            effective_overlap.clone(),
        ));
    }

    Ok(Partition {
        regions,
        effective_overlap,
        adjustments,
    })
}
