//! Configuration surface for the distributed search pipeline.
//!
//! All knobs are plain key/value configuration, deserializable from JSON.
//! Validation happens where the values are consumed: the partitioner checks the
//! grid and overlap specifications, the aggregator checks the threshold mode.

use serde::{Deserialize, Serialize};

/// How the detection threshold is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Position-dependent threshold computed locally by the detection engine;
    /// no cross-worker statistics exchange.
    Variable,
    /// Each worker derives its own threshold from its own pixels.
    PerWorker,
    /// Single global threshold pooled from all workers' partial statistics and
    /// broadcast before the search phase.
    #[default]
    Global,
}

/// Voxel adjacency rule used by the detection engine and the global merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Face adjacency only: neighbors differ by one along a single axis.
    #[default]
    Faces,
    /// Full corner adjacency: neighbors differ by at most one along every axis.
    Full,
}

impl Connectivity {
    /// Neighbor offsets for an `ndim`-dimensional cube, excluding the zero
    /// offset. Face adjacency yields `2 * ndim` offsets, full adjacency
    /// `3^ndim - 1`.
    pub fn offsets(&self, ndim: usize) -> Vec<Vec<i64>> {
        match self {
            Connectivity::Faces => {
                let mut out = Vec::with_capacity(2 * ndim);
                for axis in 0..ndim {
                    for step in [-1i64, 1] {
                        let mut off = vec![0i64; ndim];
                        off[axis] = step;
                        out.push(off);
                    }
                }
                out
            }
            Connectivity::Full => {
                let mut out = vec![vec![]];
                for _ in 0..ndim {
                    let mut next = Vec::with_capacity(out.len() * 3);
                    for prefix in &out {
                        for step in [-1i64, 0, 1] {
                            let mut off = prefix.clone();
                            off.push(step);
                            next.push(off);
                        }
                    }
                    out = next;
                }
                out.retain(|off| off.iter().any(|&s| s != 0));
                out
            }
        }
    }
}

/// Sort key applied by the finalizer before global identifiers are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Lexicographic order of the global bounding-box minimum corner.
    #[default]
    Position,
    /// Decreasing peak flux.
    PeakFlux,
    /// Decreasing voxel count.
    VoxelCount,
}

/// A named padding requirement from a downstream feature (fitting box
/// half-width, threshold box, ...). The partitioner raises the overlap margin
/// to at least this many cells on each listed axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    /// Name of the feature requiring the padding, for reporting.
    pub feature: String,
    /// Required padding in cells, one entry per image axis.
    pub cells: Vec<usize>,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Worker-grid subdivision count per axis. The product must equal the
    /// worker count.
    pub subdivisions: Vec<usize>,
    /// Requested base overlap per axis, in cells.
    pub overlap: Vec<usize>,
    /// Padding requirements from enabled downstream features.
    pub paddings: Vec<Padding>,
    /// Threshold mode selector.
    pub threshold_mode: ThresholdMode,
    /// Signal-to-noise cut applied above the pooled location estimate.
    pub snr_cut: f64,
    /// User-supplied absolute flux threshold. When set, statistics are still
    /// gathered for reporting but the threshold itself is not derived from them.
    pub threshold: Option<f64>,
    /// Use robust statistics (median / MADFM) instead of mean / stddev.
    pub robust_stats: bool,
    /// Voxel adjacency rule.
    pub connectivity: Connectivity,
    /// Whether post-detection growth is enabled. Growth never runs during the
    /// global boundary merge (the coordinator holds no flux array); the merger
    /// logs that limitation when this flag is on.
    pub flag_growth: bool,
    /// True minimum object size. Relaxed during the parallel search so that
    /// boundary-truncated fragments survive to the merge; re-applied when
    /// interior detections are finalized.
    pub min_voxels: usize,
    /// Finalizer sort key.
    pub sort_key: SortKey,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            subdivisions: vec![1],
            overlap: vec![0],
            paddings: Vec::new(),
            threshold_mode: ThresholdMode::Global,
            snr_cut: 5.0,
            threshold: None,
            robust_stats: true,
            connectivity: Connectivity::Faces,
            flag_growth: false,
            min_voxels: 1,
            sort_key: SortKey::Position,
        }
    }
}

impl SearchConfig {
    /// Number of workers implied by the subdivision grid.
    pub fn worker_count(&self) -> usize {
        self.subdivisions.iter().product()
    }
}
