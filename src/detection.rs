//! The detection record shared by every stage of the pipeline.
//!
//! A detection is a single tagged record: a connected set of voxels with their
//! flux values, a local-to-global coordinate offset, derived scalar
//! attributes, an edge flag, and an optional global identifier that remains
//! unset until the finalizer assigns it.

use serde::{Deserialize, Serialize};

/// One voxel of a detection: discrete coordinates plus the pixel value there.
/// Values travel with the coordinates so that boundary-merged objects can have
/// their flux and peak recomputed without access to the pixel array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voxel {
    pub pos: Vec<i64>,
    pub value: f64,
}

/// Inclusive axis-aligned bounding box of a voxel set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec<i64>,
    pub max: Vec<i64>,
}

/// A connected region of signal.
///
/// Created by a detection engine in local coordinates with a zero offset. The
/// boundary classifier sets `is_edge`; applying the offset moves the voxels
/// into the global frame. Only the finalizer assigns `id`, and only the
/// finalizer sets the informational `on_image_boundary` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub voxels: Vec<Voxel>,
    /// Per-axis local-to-global coordinate offset, not yet applied to `voxels`.
    pub offset: Vec<i64>,
    /// Highest voxel value.
    pub peak: f64,
    /// Sum of voxel values.
    pub flux: f64,
    /// Whether the detection touches an inter-worker overlap margin. Evaluated
    /// once before transport and never revised by the merge.
    pub is_edge: bool,
    /// Sequential global identifier, `None` until finalization.
    pub id: Option<u32>,
    /// Whether the finalized detection touches the true image boundary.
    /// Reporting only; never feeds back into merging.
    pub on_image_boundary: bool,
}

impl Detection {
    /// Build a detection from its voxel set, computing the scalar attributes.
    pub fn from_voxels(voxels: Vec<Voxel>, offset: Vec<i64>) -> Self {
        let mut det = Self {
            voxels,
            offset,
            peak: 0.0,
            flux: 0.0,
            is_edge: false,
            id: None,
            on_image_boundary: false,
        };
        det.recompute_scalars();
        det
    }

    pub fn ndim(&self) -> usize {
        self.offset.len()
    }

    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    /// Recompute peak and flux from the voxel values.
    pub fn recompute_scalars(&mut self) {
        self.flux = self.voxels.iter().map(|v| v.value).sum();
        self.peak = self
            .voxels
            .iter()
            .map(|v| v.value)
            .fold(f64::NEG_INFINITY, f64::max);
        if self.voxels.is_empty() {
            self.peak = 0.0;
        }
    }

    /// Bake the offset into the voxel coordinates and reset it to zero.
    pub fn apply_offset(&mut self) {
        if self.offset.iter().all(|&o| o == 0) {
            return;
        }
        for voxel in &mut self.voxels {
            for (p, o) in voxel.pos.iter_mut().zip(&self.offset) {
                *p += o;
            }
        }
        self.offset = vec![0; self.offset.len()];
    }

    /// Derived bounding box, `None` for an empty voxel set. Offset not applied.
    pub fn bbox(&self) -> Option<BoundingBox> {
        let first = self.voxels.first()?;
        let mut min = first.pos.clone();
        let mut max = first.pos.clone();
        for voxel in &self.voxels[1..] {
            for axis in 0..min.len() {
                min[axis] = min[axis].min(voxel.pos[axis]);
                max[axis] = max[axis].max(voxel.pos[axis]);
            }
        }
        Some(BoundingBox { min, max })
    }

    /// Bounding-box minimum corner with the offset applied, used as the
    /// position sort key. Empty detections sort first.
    pub fn global_min_corner(&self) -> Vec<i64> {
        match self.bbox() {
            Some(bbox) => bbox
                .min
                .iter()
                .zip(&self.offset)
                .map(|(&m, &o)| m + o)
                .collect(),
            None => vec![i64::MIN; self.ndim()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn det(positions: &[&[i64]], values: &[f64], offset: &[i64]) -> Detection {
        let voxels = positions
            .iter()
            .zip(values)
            .map(|(pos, &value)| Voxel {
                pos: pos.to_vec(),
                value,
            })
            .collect();
        Detection::from_voxels(voxels, offset.to_vec())
    }

    #[test]
    fn test_scalars_from_voxels() {
        let d = det(&[&[1, 2], &[1, 3], &[2, 3]], &[1.0, 5.0, 2.0], &[0, 0]);
        assert_relative_eq!(d.peak, 5.0);
        assert_relative_eq!(d.flux, 8.0);
        assert_eq!(d.voxel_count(), 3);
        assert!(d.id.is_none());
        assert!(!d.is_edge);
    }

    #[test]
    fn test_apply_offset_bakes_and_resets() {
        let mut d = det(&[&[1, 2], &[2, 2]], &[1.0, 1.0], &[10, 20]);
        d.apply_offset();
        assert_eq!(d.voxels[0].pos, vec![11, 22]);
        assert_eq!(d.voxels[1].pos, vec![12, 22]);
        assert_eq!(d.offset, vec![0, 0]);
        // Applying again is a no-op.
        d.apply_offset();
        assert_eq!(d.voxels[0].pos, vec![11, 22]);
    }

    #[test]
    fn test_bbox() {
        let d = det(&[&[3, 7], &[1, 9], &[2, 8]], &[1.0, 1.0, 1.0], &[0, 0]);
        let bbox = d.bbox().unwrap();
        assert_eq!(bbox.min, vec![1, 7]);
        assert_eq!(bbox.max, vec![3, 9]);
    }

    #[test]
    fn test_global_min_corner_includes_offset() {
        let d = det(&[&[3], &[5]], &[1.0, 1.0], &[100]);
        assert_eq!(d.global_min_corner(), vec![103]);
    }

    #[test]
    fn test_empty_detection() {
        let d = Detection::from_voxels(Vec::new(), vec![0, 0]);
        assert!(d.bbox().is_none());
        assert_relative_eq!(d.flux, 0.0);
        assert_relative_eq!(d.peak, 0.0);
    }
}
