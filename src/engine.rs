//! Detection-engine seam and a reference flood-fill engine.
//!
//! The pipeline treats the detector as a pure function from (pixel data,
//! threshold, connectivity) to an unordered list of detections in local
//! coordinates. The numeric algorithm behind that function is not this crate's
//! concern; `FloodFillEngine` is a straightforward reference implementation
//! used by the demo and the tests.

use ndarray::{ArrayD, ArrayViewD, Dimension, IxDyn};

use crate::config::Connectivity;
use crate::detection::{Detection, Voxel};

/// A source finder for one worker's sub-region.
///
/// Implementations must return detections in local coordinates with a zero
/// offset, must not apply minimum-size filtering (boundary-truncated fragments
/// have to survive to the global merge), and must treat NaN pixels as blank.
/// In variable-threshold mode the `threshold` argument is the configured S/N
/// cut and the engine is expected to derive position-dependent thresholds
/// itself.
pub trait DetectionEngine {
    fn detect(&self, pixels: &ArrayViewD<'_, f64>, threshold: f64) -> Vec<Detection>;
}

/// Reference engine: flood fill over pixels strictly above an absolute
/// threshold, under the configured adjacency rule.
#[derive(Debug, Clone, Copy)]
pub struct FloodFillEngine {
    pub connectivity: Connectivity,
}

impl FloodFillEngine {
    pub fn new(connectivity: Connectivity) -> Self {
        Self { connectivity }
    }
}

impl DetectionEngine for FloodFillEngine {
    fn detect(&self, pixels: &ArrayViewD<'_, f64>, threshold: f64) -> Vec<Detection> {
        let shape = pixels.shape().to_vec();
        let ndim = shape.len();
        let offsets = self.connectivity.offsets(ndim);
        let mut visited = ArrayD::from_elem(IxDyn(&shape), false);
        let mut detections = Vec::new();

        for (idx, &seed) in pixels.indexed_iter() {
            let coords = idx.slice().to_vec();
            if visited[IxDyn(&coords)] || !(seed > threshold) {
                continue;
            }

            visited[IxDyn(&coords)] = true;
            let mut stack = vec![coords];
            let mut voxels = Vec::new();
            while let Some(pos) = stack.pop() {
                voxels.push(Voxel {
                    pos: pos.iter().map(|&p| p as i64).collect(),
                    value: pixels[IxDyn(&pos)],
                });

                for off in &offsets {
                    let mut neighbor = Vec::with_capacity(ndim);
                    let mut in_bounds = true;
                    for axis in 0..ndim {
                        let c = pos[axis] as i64 + off[axis];
                        if c < 0 || c >= shape[axis] as i64 {
                            in_bounds = false;
                            break;
                        }
                        neighbor.push(c as usize);
                    }
                    if !in_bounds || visited[IxDyn(&neighbor)] {
                        continue;
                    }
                    let value = pixels[IxDyn(&neighbor)];
                    if value > threshold {
                        visited[IxDyn(&neighbor)] = true;
                        stack.push(neighbor);
                    }
                }
            }

            detections.push(Detection::from_voxels(voxels, vec![0; ndim]));
        }

        detections
    }
}
