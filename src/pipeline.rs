//! SPMD orchestration of the partition → detect → reconcile pipeline.
//!
//! One thread per worker rank plus the coordinator on the calling thread,
//! joined at the end of the run. Each phase transition is a barrier enforced
//! by the blocking channel topology: workers cannot pass the threshold
//! broadcast until the coordinator publishes it, and the coordinator cannot
//! merge until every worker's edge list has arrived. A fatal error in any
//! participant collapses the channels and aborts every other participant;
//! there is no partial-success mode and no rollback.

use std::fmt;
use std::thread;

use ndarray::{ArrayD, ArrayViewD, Axis, Slice};
use tracing::{debug, error, info, warn};

use crate::classify::is_edge_detection;
use crate::comms::{channel_topology, CoordinatorLink, WorkerLink};
use crate::config::{SearchConfig, ThresholdMode};
use crate::detection::Detection;
use crate::domain::{AxisRange, ImageDomain, Rank, SubRegion, COORDINATOR};
use crate::engine::DetectionEngine;
use crate::error::SearchError;
use crate::finalize::{finalize_catalog, Catalog};
use crate::merge::merge_edge_detections;
use crate::partition::partition_domain;
use crate::stats::{derive_threshold, pool_partials, GlobalThreshold, StatsPartial};
use crate::wire;

/// Pipeline phases, in order. Every transition is a barrier; a fatal error in
/// any phase lands in `Failed` and aborts all participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Unpartitioned,
    Partitioned,
    StatsCollected,
    ThresholdBroadcast,
    LocallyDetected,
    Classified,
    Transported,
    Merged,
    Finalized,
    Failed,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// View of the cube restricted to the given per-axis ranges.
fn region_view<'a>(cube: &'a ArrayD<f64>, ranges: &[AxisRange]) -> ArrayViewD<'a, f64> {
    let mut view = cube.view();
    for (axis, range) in ranges.iter().enumerate() {
        view.slice_axis_inplace(Axis(axis), Slice::from(range.start..range.end));
    }
    view
}

struct WorkerOutput {
    interior: Vec<Detection>,
    threshold: f64,
}

fn worker_run<E: DetectionEngine>(
    config: &SearchConfig,
    domain: &ImageDomain,
    cube: &ArrayD<f64>,
    region: &SubRegion,
    link: WorkerLink,
    engine: &E,
) -> Result<WorkerOutput, SearchError> {
    let rank = region.rank();

    let threshold = match config.threshold_mode {
        ThresholdMode::Global => {
            let inner = region_view(cube, region.inner());
            let partial = StatsPartial::from_pixels(inner.iter().copied(), config.robust_stats);
            if partial.is_empty() {
                warn!(%rank, "no valid pixels in assigned region; reporting empty partial");
            }
            link.send(wire::encode_stats(rank, &region.outer_origin(), &partial)?)?;

            // Collective barrier: block until the coordinator publishes the
            // pooled threshold.
            let frame = link.recv()?;
            let (_, published) = wire::decode_threshold(&frame)?;
            debug!(%rank, threshold = published.value, "received global threshold");
            published.value
        }
        ThresholdMode::PerWorker => {
            if let Some(user) = config.threshold {
                user
            } else {
                let inner = region_view(cube, region.inner());
                let partial =
                    StatsPartial::from_pixels(inner.iter().copied(), config.robust_stats);
                if partial.is_empty() {
                    return Err(SearchError::Aggregation(format!(
                        "{rank}: no valid pixels for a per-worker threshold"
                    )));
                }
                partial.location + config.snr_cut * partial.spread
            }
        }
        ThresholdMode::Variable => {
            if config.threshold.is_some() {
                warn!(%rank, "variable threshold requested; ignoring the absolute threshold");
            }
            // The engine derives position-dependent thresholds itself; it is
            // handed the S/N cut.
            config.snr_cut
        }
    };

    let outer = region_view(cube, region.outer());
    let detections = engine.detect(&outer, threshold);
    debug!(%rank, phase = %PipelinePhase::LocallyDetected, count = detections.len(), "local search complete");

    let global_offset: Vec<i64> = region
        .outer_origin()
        .iter()
        .zip(domain.origin())
        .map(|(&o, &parent)| o + parent)
        .collect();

    let mut interior = Vec::new();
    let mut edge = Vec::new();
    for mut det in detections {
        det.is_edge = is_edge_detection(&det, region);
        if det.is_edge {
            // Full local voxel list kept for transport; no size filter here,
            // this may be a boundary-truncated fragment.
            edge.push(det);
        } else {
            // Finalized in place: move to the global frame and re-apply the
            // true minimum-size filter that the parallel search relaxed.
            det.offset = global_offset.clone();
            det.apply_offset();
            if det.voxel_count() >= config.min_voxels {
                interior.push(det);
            }
        }
    }
    info!(
        %rank,
        phase = %PipelinePhase::Classified,
        interior = interior.len(),
        edge = edge.len(),
        "detections classified"
    );

    link.send(wire::encode_detections(rank, &region.outer_origin(), &edge)?)?;
    Ok(WorkerOutput {
        interior,
        threshold,
    })
}

fn coordinator_run(
    config: &SearchConfig,
    domain: &ImageDomain,
    link: &CoordinatorLink,
) -> Result<(Vec<Detection>, Option<GlobalThreshold>), SearchError> {
    let worker_count = link.worker_count();

    let threshold = if config.threshold_mode == ThresholdMode::Global {
        let mut partials = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let rank = Rank(index as u16);
            let frame = link.recv_from(rank)?;
            let (envelope, partial) = wire::decode_stats(&frame)?;
            if envelope.rank != rank {
                return Err(SearchError::Protocol(format!(
                    "expected statistics from {rank}, envelope names {}",
                    envelope.rank
                )));
            }
            if partial.is_empty() {
                warn!(%rank, "zero-count partial will be excluded from pooling");
            }
            partials.push(partial);
        }
        info!(phase = %PipelinePhase::StatsCollected, workers = worker_count, "partial statistics gathered");

        let published = match (config.threshold, pool_partials(&partials)) {
            (Some(user), Ok(pooled)) => GlobalThreshold {
                value: user,
                location: pooled.location,
                spread: pooled.spread,
            },
            (Some(user), Err(err)) => {
                warn!(%err, "statistics pooling failed; the user threshold keeps the run defined");
                GlobalThreshold {
                    value: user,
                    location: user,
                    spread: 0.0,
                }
            }
            (None, Ok(pooled)) => derive_threshold(&pooled, config.snr_cut),
            (None, Err(err)) => return Err(err),
        };

        link.broadcast(&wire::encode_threshold(COORDINATOR, &published)?)?;
        info!(
            phase = %PipelinePhase::ThresholdBroadcast,
            threshold = published.value,
            "global threshold published"
        );
        Some(published)
    } else {
        None
    };

    // Edge lists arrive in fixed rank order. The merge below is
    // order-independent, so switching this loop to an any-order receive would
    // not change the catalog.
    let mut edge = Vec::new();
    for index in 0..worker_count {
        let rank = Rank(index as u16);
        let frame = link.recv_from(rank)?;
        let (envelope, detections) = wire::decode_detections(&frame)?;
        if envelope.rank != rank {
            return Err(SearchError::Protocol(format!(
                "expected detections from {rank}, envelope names {}",
                envelope.rank
            )));
        }
        if envelope.origin.len() != domain.ndim() {
            return Err(SearchError::Protocol(format!(
                "{rank} sent an origin with {} axes, image has {}",
                envelope.origin.len(),
                domain.ndim()
            )));
        }
        let received = detections.len();
        for mut det in detections {
            if !det.is_edge {
                return Err(SearchError::Protocol(format!(
                    "{rank} transported an interior detection"
                )));
            }
            // Into the true global frame: sub-region origin plus the offset
            // of this cube within its parent image.
            det.offset = envelope
                .origin
                .iter()
                .zip(domain.origin())
                .map(|(&o, &parent)| o + parent)
                .collect();
            det.apply_offset();
            edge.push(det);
        }
        debug!(%rank, received, "edge list received");
    }
    info!(phase = %PipelinePhase::Transported, edge = edge.len(), "all edge lists received");

    let mut fused = merge_edge_detections(edge, config.connectivity, config.flag_growth);
    // Same minimum-size filter the workers apply to interior detections, now
    // that fragments have been reassembled.
    fused.retain(|det| det.voxel_count() >= config.min_voxels);
    info!(phase = %PipelinePhase::Merged, fused = fused.len(), "boundary merge complete");
    Ok((fused, threshold))
}

/// Run the full distributed search over a cube.
///
/// Spawns one thread per worker rank, runs the coordinator on the calling
/// thread, and returns the finalized catalog. Any participant's fatal error
/// aborts the whole run.
pub fn run_pipeline<E>(
    config: &SearchConfig,
    domain: &ImageDomain,
    cube: &ArrayD<f64>,
    engine: &E,
) -> Result<Catalog, SearchError>
where
    E: DetectionEngine + Sync,
{
    if cube.shape() != domain.extents() {
        return Err(SearchError::Domain(format!(
            "cube shape {:?} does not match domain extents {:?}",
            cube.shape(),
            domain.extents()
        )));
    }

    let worker_count = config.worker_count();
    let partition = partition_domain(
        domain,
        &config.subdivisions,
        &config.overlap,
        &config.paddings,
        worker_count,
    )?;
    info!(phase = %PipelinePhase::Partitioned, workers = worker_count, "domain partitioned");

    let (coordinator, links) = channel_topology(worker_count);

    let (worker_results, coordinator_result) = thread::scope(|scope| {
        let handles: Vec<_> = partition
            .regions
            .iter()
            .zip(links)
            .map(|(region, link)| {
                scope.spawn(move || worker_run(config, domain, cube, region, link, engine))
            })
            .collect();

        let coordinator_result = coordinator_run(config, domain, &coordinator);
        // Closing the coordinator's endpoints unblocks any worker still
        // waiting on a broadcast after a coordinator-side abort.
        drop(coordinator);

        let worker_results: Vec<Result<WorkerOutput, SearchError>> = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(SearchError::Transport(format!(
                        "worker #{index} panicked during the run"
                    )))
                })
            })
            .collect();

        (worker_results, coordinator_result)
    });

    let mut outputs = Vec::with_capacity(worker_count);
    let mut errors: Vec<SearchError> = Vec::new();
    for result in worker_results {
        match result {
            Ok(output) => outputs.push(output),
            Err(err) => errors.push(err),
        }
    }
    let coordinator_output = match coordinator_result {
        Ok(output) => Some(output),
        Err(err) => {
            errors.push(err);
            None
        }
    };

    // One participant's failure collapses everyone else's channels. Report the
    // root cause, not the secondary transport errors it triggers.
    if !errors.is_empty() {
        let pos = errors
            .iter()
            .position(|e| !matches!(e, SearchError::Transport(_)))
            .unwrap_or(0);
        let err = errors.swap_remove(pos);
        error!(phase = %PipelinePhase::Failed, %err, "pipeline aborted");
        return Err(err);
    }
    let Some((fused, threshold)) = coordinator_output else {
        return Err(SearchError::Transport(
            "coordinator produced no result".to_string(),
        ));
    };

    if config.threshold_mode == ThresholdMode::Global {
        // Broadcast contract: every worker searched with the same value.
        debug_assert!(outputs
            .windows(2)
            .all(|pair| pair[0].threshold == pair[1].threshold));
    }
    if let Some(first) = outputs.first() {
        debug!(threshold = first.threshold, "search threshold applied");
    }

    let interior: Vec<Detection> = outputs
        .into_iter()
        .flat_map(|output| output.interior)
        .collect();
    let detections = finalize_catalog(interior, fused, domain, config.sort_key);
    info!(phase = %PipelinePhase::Finalized, objects = detections.len(), "pipeline complete");

    Ok(Catalog {
        detections,
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Connectivity;
    use crate::engine::FloodFillEngine;
    use ndarray::IxDyn;

    fn cube_2d(shape: [usize; 2]) -> ArrayD<f64> {
        ArrayD::zeros(IxDyn(&shape))
    }

    fn engine() -> FloodFillEngine {
        FloodFillEngine::new(Connectivity::Faces)
    }

    fn base_config() -> SearchConfig {
        SearchConfig {
            subdivisions: vec![4, 1],
            overlap: vec![3, 0],
            threshold: Some(5.0),
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_split_object_yields_one_catalog_entry() {
        // A 100x1 image split four ways along axis 0; a single object at rows
        // 48..=52 straddles the worker boundary at 50.
        let domain = ImageDomain::new(vec![100, 1]).unwrap();
        let mut cube = cube_2d([100, 1]);
        for row in 48..=52 {
            cube[IxDyn(&[row, 0])] = 10.0;
        }

        let catalog = run_pipeline(&base_config(), &domain, &cube, &engine()).unwrap();
        assert_eq!(catalog.detections.len(), 1);

        let det = &catalog.detections[0];
        assert_eq!(det.voxel_count(), 5);
        assert_eq!(det.id, Some(1));
        let mut rows: Vec<i64> = det.voxels.iter().map(|v| v.pos[0]).collect();
        rows.sort_unstable();
        assert_eq!(rows, vec![48, 49, 50, 51, 52]);
        assert!(det.is_edge);
    }

    #[test]
    fn test_contained_object_stays_interior() {
        // Same grid, object wholly inside worker 0's tile and outside every
        // overlap band: finalized per-worker, never transported.
        let domain = ImageDomain::new(vec![100, 1]).unwrap();
        let mut cube = cube_2d([100, 1]);
        for row in 10..=15 {
            cube[IxDyn(&[row, 0])] = 10.0;
        }

        let catalog = run_pipeline(&base_config(), &domain, &cube, &engine()).unwrap();
        assert_eq!(catalog.detections.len(), 1);
        let det = &catalog.detections[0];
        assert!(!det.is_edge);
        assert_eq!(det.voxel_count(), 6);
        assert_eq!(det.id, Some(1));
    }

    #[test]
    fn test_corner_straddling_object_merges_from_four_fragments() {
        let domain = ImageDomain::new(vec![20, 20]).unwrap();
        let mut cube = cube_2d([20, 20]);
        // A plus sign centered on the 2x2 grid corner at (10, 10).
        for row in 8..=12 {
            cube[IxDyn(&[row, 10])] = 10.0;
        }
        for col in 8..=12 {
            cube[IxDyn(&[10, col])] = 10.0;
        }

        let config = SearchConfig {
            subdivisions: vec![2, 2],
            overlap: vec![3, 3],
            threshold: Some(5.0),
            ..SearchConfig::default()
        };
        let catalog = run_pipeline(&config, &domain, &cube, &engine()).unwrap();
        assert_eq!(catalog.detections.len(), 1);
        assert_eq!(catalog.detections[0].voxel_count(), 9);
    }

    #[test]
    fn test_global_threshold_is_pooled_and_applied() {
        // Flat background 1.0 with stddev 0: pooled threshold is exactly the
        // background level, and the bright object clears it.
        let domain = ImageDomain::new(vec![40, 1]).unwrap();
        let mut cube = ArrayD::from_elem(IxDyn(&[40, 1]), 1.0);
        cube[IxDyn(&[20, 0])] = 50.0;

        let config = SearchConfig {
            subdivisions: vec![2, 1],
            overlap: vec![2, 0],
            robust_stats: true,
            ..SearchConfig::default()
        };
        let catalog = run_pipeline(&config, &domain, &cube, &engine()).unwrap();

        let published = catalog.threshold.unwrap();
        assert!((published.location - 1.0).abs() < 1e-9);
        assert!((published.value - 1.0).abs() < 1e-9);
        assert_eq!(catalog.detections.len(), 1);
        assert_eq!(catalog.detections[0].voxel_count(), 1);
    }

    #[test]
    fn test_per_worker_mode_runs_without_coordinator_traffic() {
        let domain = ImageDomain::new(vec![40, 1]).unwrap();
        let mut cube = cube_2d([40, 1]);
        cube[IxDyn(&[5, 0])] = 10.0;
        cube[IxDyn(&[35, 0])] = 10.0;

        let config = SearchConfig {
            subdivisions: vec![2, 1],
            overlap: vec![2, 0],
            threshold_mode: ThresholdMode::PerWorker,
            threshold: Some(5.0),
            ..SearchConfig::default()
        };
        let catalog = run_pipeline(&config, &domain, &cube, &engine()).unwrap();
        assert_eq!(catalog.detections.len(), 2);
        assert!(catalog.threshold.is_none());
    }

    #[test]
    fn test_variable_mode_hands_the_cut_to_the_engine() {
        let domain = ImageDomain::new(vec![40, 1]).unwrap();
        let mut cube = cube_2d([40, 1]);
        cube[IxDyn(&[12, 0])] = 10.0;

        let config = SearchConfig {
            subdivisions: vec![2, 1],
            overlap: vec![2, 0],
            threshold_mode: ThresholdMode::Variable,
            snr_cut: 5.0,
            ..SearchConfig::default()
        };
        let catalog = run_pipeline(&config, &domain, &cube, &engine()).unwrap();
        assert_eq!(catalog.detections.len(), 1);
        assert!(catalog.threshold.is_none());
    }

    #[test]
    fn test_min_size_filter_reapplied_to_interior_only() {
        let domain = ImageDomain::new(vec![100, 1]).unwrap();
        let mut cube = cube_2d([100, 1]);
        // A single-voxel interior object: dropped by the size filter.
        cube[IxDyn(&[10, 0])] = 10.0;
        // A two-voxel object straddling the boundary at 50: each fragment
        // alone would fail the filter, the merged object survives as edge.
        cube[IxDyn(&[49, 0])] = 10.0;
        cube[IxDyn(&[50, 0])] = 10.0;

        let config = SearchConfig {
            min_voxels: 2,
            ..base_config()
        };
        let catalog = run_pipeline(&config, &domain, &cube, &engine()).unwrap();
        assert_eq!(catalog.detections.len(), 1);
        assert_eq!(catalog.detections[0].voxel_count(), 2);
        assert!(catalog.detections[0].is_edge);
    }

    #[test]
    fn test_parent_image_offset_shifts_the_catalog_frame() {
        let domain = ImageDomain::with_origin(vec![100, 1], vec![1000, 7]).unwrap();
        let mut cube = cube_2d([100, 1]);
        for row in 48..=52 {
            cube[IxDyn(&[row, 0])] = 10.0;
        }

        let catalog = run_pipeline(&base_config(), &domain, &cube, &engine()).unwrap();
        assert_eq!(catalog.detections.len(), 1);
        let corner = catalog.detections[0].global_min_corner();
        assert_eq!(corner, vec![1048, 7]);
    }

    #[test]
    fn test_empty_cube_yields_empty_catalog() {
        let domain = ImageDomain::new(vec![100, 1]).unwrap();
        let cube = cube_2d([100, 1]);
        let catalog = run_pipeline(&base_config(), &domain, &cube, &engine()).unwrap();
        assert!(catalog.detections.is_empty());
    }

    #[test]
    fn test_shape_mismatch_is_a_domain_error() {
        let domain = ImageDomain::new(vec![100, 1]).unwrap();
        let cube = cube_2d([50, 1]);
        let err = run_pipeline(&base_config(), &domain, &cube, &engine()).unwrap_err();
        assert!(matches!(err, SearchError::Domain(_)));
    }

    #[test]
    fn test_all_blank_pixels_abort_global_aggregation() {
        let domain = ImageDomain::new(vec![40, 1]).unwrap();
        let cube = ArrayD::from_elem(IxDyn(&[40, 1]), f64::NAN);
        let config = SearchConfig {
            subdivisions: vec![2, 1],
            overlap: vec![2, 0],
            ..SearchConfig::default()
        };
        let err = run_pipeline(&config, &domain, &cube, &engine()).unwrap_err();
        assert!(matches!(err, SearchError::Aggregation(_)));
    }

    #[test]
    fn test_version_mismatch_aborts_the_coordinator() {
        // A tampered stats frame: the coordinator must fail with a protocol
        // version error rather than skip the message.
        let (coordinator, workers) = channel_topology(1);
        let partial = StatsPartial {
            count: 10,
            location: 0.0,
            spread: 1.0,
        };
        let mut frame = wire::encode_stats(Rank(0), &[0, 0], &partial).unwrap();
        frame[4] = 0xFF;
        frame[5] = 0xFF;
        workers[0].send(frame).unwrap();

        let domain = ImageDomain::new(vec![10, 10]).unwrap();
        let config = SearchConfig {
            subdivisions: vec![1, 1],
            overlap: vec![0, 0],
            ..SearchConfig::default()
        };
        let err = coordinator_run(&config, &domain, &coordinator).unwrap_err();
        assert!(matches!(err, SearchError::ProtocolVersion { .. }));
    }
}
