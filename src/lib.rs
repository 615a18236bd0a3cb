//! Distributed detection of connected objects in multi-dimensional image
//! cubes.
//!
//! The pipeline partitions a cube across a grid of worker ranks with an
//! overlap margin, pools noise statistics into a global threshold, runs a
//! connected-component search per worker, and reconciles objects that straddle
//! partition boundaries into one globally consistent catalog. Workers and the
//! coordinator exchange length-framed, versioned binary messages over a star
//! topology; the whole exchange runs in-process on threads and channels.

pub mod classify;
pub mod comms;
pub mod config;
pub mod detection;
pub mod domain;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod merge;
pub mod partition;
pub mod pipeline;
pub mod stats;
pub mod wire;

pub use classify::is_edge_detection;
pub use config::{Connectivity, Padding, SearchConfig, SortKey, ThresholdMode};
pub use detection::{BoundingBox, Detection, Voxel};
pub use domain::{AxisRange, ImageDomain, Rank, Side, SubRegion, COORDINATOR};
pub use engine::{DetectionEngine, FloodFillEngine};
pub use error::SearchError;
pub use finalize::{finalize_catalog, sort_detections, Catalog};
pub use merge::merge_edge_detections;
pub use partition::{partition_domain, OverlapAdjustment, Partition};
pub use pipeline::{run_pipeline, PipelinePhase};
pub use stats::{derive_threshold, pool_partials, GlobalThreshold, PooledStats, StatsPartial};
