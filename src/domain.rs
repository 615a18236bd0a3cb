//! Image geometry: the global cube shape and per-worker sub-regions.
//!
//! `ImageDomain` and each worker's `SubRegion` are created once by the
//! partitioner and never mutated afterwards. All other components treat them as
//! read-only context for one pipeline run.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SearchError;

/// Identifier of a worker participant. The coordinator is not part of the rank
/// set; it is addressed by [`COORDINATOR`] on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Rank(pub u16);

/// Sender id used by the coordinator in broadcast envelopes.
pub const COORDINATOR: Rank = Rank(u16::MAX);

impl Rank {
    /// Rank as a vector index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == COORDINATOR {
            write!(f, "coordinator")
        } else {
            write!(f, "worker #{}", self.0)
        }
    }
}

/// Half-open interval `[start, end)` along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRange {
    pub start: usize,
    pub end: usize,
}

impl AxisRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, x: usize) -> bool {
        x >= self.start && x < self.end
    }
}

/// Immutable global shape of the cube being searched.
///
/// `origin` is the position of this cube within a still-larger parent image
/// (all zeros when the cube is not a subsection). Detections are reported in
/// the parent frame, so transport corrects received coordinates by this origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDomain {
    extents: Vec<usize>,
    origin: Vec<i64>,
}

impl ImageDomain {
    /// Create a domain with the given per-axis extents and a zero origin.
    pub fn new(extents: Vec<usize>) -> Result<Self, SearchError> {
        let origin = vec![0; extents.len()];
        Self::with_origin(extents, origin)
    }

    /// Create a domain that is a subsection of a larger parent image, anchored
    /// at `origin` in the parent frame.
    pub fn with_origin(extents: Vec<usize>, origin: Vec<i64>) -> Result<Self, SearchError> {
        if extents.is_empty() {
            return Err(SearchError::Domain(
                "image domain must have at least one axis".to_string(),
            ));
        }
        if let Some(axis) = extents.iter().position(|&e| e == 0) {
            return Err(SearchError::Domain(format!(
                "image domain has zero extent on axis {axis}"
            )));
        }
        if origin.len() != extents.len() {
            return Err(SearchError::Domain(format!(
                "origin has {} axes but domain has {}",
                origin.len(),
                extents.len()
            )));
        }
        Ok(Self { extents, origin })
    }

    pub fn ndim(&self) -> usize {
        self.extents.len()
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Origin of this cube within its parent image.
    pub fn origin(&self) -> &[i64] {
        &self.origin
    }

    /// Total number of voxels.
    pub fn voxel_count(&self) -> usize {
        self.extents.iter().product()
    }

    /// Whether a global (parent-frame) coordinate lies inside the cube.
    pub fn contains(&self, pos: &[i64]) -> bool {
        pos.len() == self.ndim()
            && pos.iter().zip(&self.extents).zip(&self.origin).all(
                |((&p, &extent), &orig)| p >= orig && p < orig + extent as i64,
            )
    }

    /// Whether a global coordinate touches the true image boundary on any axis.
    pub fn on_boundary(&self, pos: &[i64]) -> bool {
        pos.len() == self.ndim()
            && pos.iter().zip(&self.extents).zip(&self.origin).any(
                |((&p, &extent), &orig)| p == orig || p == orig + extent as i64 - 1,
            )
    }
}

/// Side of a sub-region along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lower,
    Upper,
}

/// One worker's share of the image.
///
/// `inner` is the assigned tile: the inner tiles of all ranks exactly partition
/// the domain. `outer` is the tile extended by the overlap margin and clipped
/// at the true image boundary; the worker reads and searches `outer` pixels so
/// that boundary-straddling objects are fully visible to at least one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRegion {
    rank: Rank,
    grid_pos: Vec<usize>,
    grid_shape: Vec<usize>,
    inner: Vec<AxisRange>,
    outer: Vec<AxisRange>,
    overlap: Vec<usize>,
}

impl SubRegion {
    pub(crate) fn new(
        rank: Rank,
        grid_pos: Vec<usize>,
        grid_shape: Vec<usize>,
        inner: Vec<AxisRange>,
        outer: Vec<AxisRange>,
        overlap: Vec<usize>,
    ) -> Self {
        Self {
            rank,
            grid_pos,
            grid_shape,
            inner,
            outer,
            overlap,
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Position of this region within the subdivision grid.
    pub fn grid_pos(&self) -> &[usize] {
        &self.grid_pos
    }

    pub fn ndim(&self) -> usize {
        self.inner.len()
    }

    /// Assigned (non-overlap) tile.
    pub fn inner(&self) -> &[AxisRange] {
        &self.inner
    }

    /// Tile extended by the clipped overlap margin.
    pub fn outer(&self) -> &[AxisRange] {
        &self.outer
    }

    /// Effective overlap margin per axis.
    pub fn overlap(&self) -> &[usize] {
        &self.overlap
    }

    /// Whether another rank's region lies beyond the given side of this one.
    /// The first and last cells along an axis have no neighbor on the outward
    /// side; objects there touch the true image boundary and can never be
    /// split across workers.
    pub fn has_neighbor(&self, axis: usize, side: Side) -> bool {
        match side {
            Side::Lower => self.grid_pos[axis] > 0,
            Side::Upper => self.grid_pos[axis] + 1 < self.grid_shape[axis],
        }
    }

    /// Shape of the outer tile, for slicing pixel data.
    pub fn outer_shape(&self) -> Vec<usize> {
        self.outer.iter().map(|r| r.len()).collect()
    }

    /// Origin of the outer tile in cube-local coordinates.
    pub fn outer_origin(&self) -> Vec<i64> {
        self.outer.iter().map(|r| r.start as i64).collect()
    }

    /// Whether a cube-local coordinate falls inside the outer tile.
    pub fn outer_contains(&self, pos: &[usize]) -> bool {
        pos.len() == self.ndim()
            && pos.iter().zip(&self.outer).all(|(&p, r)| r.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_rejects_degenerate_shapes() {
        assert!(ImageDomain::new(vec![]).is_err());
        assert!(ImageDomain::new(vec![100, 0]).is_err());
        assert!(ImageDomain::with_origin(vec![100], vec![0, 0]).is_err());
    }

    #[test]
    fn test_domain_contains_and_boundary() {
        let domain = ImageDomain::new(vec![10, 20]).unwrap();
        assert!(domain.contains(&[0, 0]));
        assert!(domain.contains(&[9, 19]));
        assert!(!domain.contains(&[10, 0]));
        assert!(!domain.contains(&[-1, 5]));

        assert!(domain.on_boundary(&[0, 5]));
        assert!(domain.on_boundary(&[9, 5]));
        assert!(domain.on_boundary(&[4, 19]));
        assert!(!domain.on_boundary(&[4, 5]));
    }

    #[test]
    fn test_domain_with_parent_origin() {
        let domain = ImageDomain::with_origin(vec![10], vec![100]).unwrap();
        assert!(domain.contains(&[100]));
        assert!(domain.contains(&[109]));
        assert!(!domain.contains(&[99]));
        assert!(domain.on_boundary(&[109]));
        assert!(!domain.on_boundary(&[105]));
    }

    #[test]
    fn test_rank_display() {
        assert_eq!(Rank(3).to_string(), "worker #3");
        assert_eq!(COORDINATOR.to_string(), "coordinator");
    }

    #[test]
    fn test_axis_range() {
        let r = AxisRange::new(5, 10);
        assert_eq!(r.len(), 5);
        assert!(r.contains(5));
        assert!(r.contains(9));
        assert!(!r.contains(10));
        assert!(AxisRange::new(7, 7).is_empty());
    }

    #[test]
    fn test_subregion_neighbors() {
        let region = SubRegion::new(
            Rank(1),
            vec![1, 0],
            vec![3, 1],
            vec![AxisRange::new(10, 20), AxisRange::new(0, 5)],
            vec![AxisRange::new(8, 22), AxisRange::new(0, 5)],
            vec![2, 0],
        );
        assert!(region.has_neighbor(0, Side::Lower));
        assert!(region.has_neighbor(0, Side::Upper));
        assert!(!region.has_neighbor(1, Side::Lower));
        assert!(!region.has_neighbor(1, Side::Upper));
        assert_eq!(region.outer_shape(), vec![14, 5]);
        assert_eq!(region.outer_origin(), vec![8, 0]);
        assert!(region.outer_contains(&[8, 4]));
        assert!(!region.outer_contains(&[22, 4]));
    }
}
