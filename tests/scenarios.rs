//! End-to-end pipeline scenarios over small synthetic cubes.

use approx::assert_relative_eq;
use ndarray::{ArrayD, IxDyn};

use cubesearch::{
    pool_partials, run_pipeline, wire, FloodFillEngine, ImageDomain, Rank, SearchConfig,
    SearchError, StatsPartial,
};
use cubesearch::comms::channel_topology;

fn engine() -> FloodFillEngine {
    FloodFillEngine::new(cubesearch::Connectivity::Faces)
}

/// A 100x1 image split four ways along axis 0, absolute threshold 5.0.
fn four_way_config() -> SearchConfig {
    SearchConfig {
        subdivisions: vec![4, 1],
        overlap: vec![3, 0],
        threshold: Some(5.0),
        ..SearchConfig::default()
    }
}

/// An object straddling the worker boundary at column 50 must come out of the
/// pipeline as exactly one catalog entry with all five voxels and id 1.
#[test]
fn split_object_is_reassembled() {
    let domain = ImageDomain::new(vec![100, 1]).unwrap();
    let mut cube = ArrayD::zeros(IxDyn(&[100, 1]));
    for row in 48..=52 {
        cube[IxDyn(&[row, 0])] = 10.0;
    }

    let catalog = run_pipeline(&four_way_config(), &domain, &cube, &engine()).unwrap();
    assert_eq!(catalog.detections.len(), 1);

    let det = &catalog.detections[0];
    assert_eq!(det.id, Some(1));
    assert_eq!(det.voxel_count(), 5);
    assert_relative_eq!(det.flux, 50.0);

    let mut rows: Vec<i64> = det.voxels.iter().map(|v| v.pos[0]).collect();
    rows.sort_unstable();
    assert_eq!(rows, vec![48, 49, 50, 51, 52]);
}

/// An object wholly inside one worker's tile, clear of every overlap band,
/// stays interior: one catalog entry, not flagged as boundary-merged.
#[test]
fn contained_object_is_finalized_locally() {
    let domain = ImageDomain::new(vec![100, 1]).unwrap();
    let mut cube = ArrayD::zeros(IxDyn(&[100, 1]));
    for row in 10..=15 {
        cube[IxDyn(&[row, 0])] = 10.0;
    }

    let catalog = run_pipeline(&four_way_config(), &domain, &cube, &engine()).unwrap();
    assert_eq!(catalog.detections.len(), 1);
    assert!(!catalog.detections[0].is_edge);
    assert_eq!(catalog.detections[0].voxel_count(), 6);
}

/// Pooled statistics combine count-weighted, and every worker searches with
/// the identical broadcast value.
#[test]
fn pooled_mean_is_count_weighted() {
    let partials = vec![
        StatsPartial {
            count: 100,
            location: 5.0,
            spread: 1.0,
        },
        StatsPartial {
            count: 300,
            location: 7.0,
            spread: 2.0,
        },
    ];
    let pooled = pool_partials(&partials).unwrap();
    assert_relative_eq!(pooled.location, 6.5, epsilon = 1e-12);

    // The broadcast delivers the same frame to every rank.
    let (coordinator, workers) = channel_topology(4);
    let threshold = cubesearch::derive_threshold(&pooled, 5.0);
    let frame = wire::encode_threshold(cubesearch::COORDINATOR, &threshold).unwrap();
    coordinator.broadcast(&frame).unwrap();
    for link in &workers {
        let received = link.recv().unwrap();
        let (_, decoded) = wire::decode_threshold(&received).unwrap();
        assert_relative_eq!(decoded.value, threshold.value);
        assert_relative_eq!(decoded.location, 6.5, epsilon = 1e-12);
    }
}

/// A frame declaring an unsupported protocol version must fail decoding with
/// the version error kind, never be skipped.
#[test]
fn version_mismatch_is_fatal() {
    let partial = StatsPartial {
        count: 42,
        location: 1.0,
        spread: 0.5,
    };
    let mut frame = wire::encode_stats(Rank(0), &[0, 0], &partial).unwrap();
    // Version field sits after the 4-byte magic.
    frame[4] = 0xFF;
    frame[5] = 0xFF;

    let err = wire::decode_stats(&frame).unwrap_err();
    match err {
        SearchError::ProtocolVersion { found, expected } => {
            assert_eq!(found, 0xFFFF);
            assert_eq!(expected, wire::PROTOCOL_VERSION);
        }
        other => panic!("expected a protocol version error, got {other:?}"),
    }
    assert!(err.is_protocol());
}

/// Partitioned and single-worker runs of the same cube produce the same
/// objects.
#[test]
fn partitioned_run_matches_single_worker_run() {
    let domain = ImageDomain::new(vec![60, 60]).unwrap();
    let mut cube = ArrayD::zeros(IxDyn(&[60, 60]));
    // One object across the vertical boundary at 30, one interior blob, one
    // hugging the true image boundary.
    for col in 28..=33 {
        cube[IxDyn(&[15, col])] = 8.0;
    }
    for row in 40..=42 {
        for col in 10..=11 {
            cube[IxDyn(&[row, col])] = 6.0;
        }
    }
    cube[IxDyn(&[0, 59])] = 9.0;

    let split = SearchConfig {
        subdivisions: vec![2, 2],
        overlap: vec![4, 4],
        threshold: Some(5.0),
        ..SearchConfig::default()
    };
    let single = SearchConfig {
        subdivisions: vec![1, 1],
        overlap: vec![0, 0],
        threshold: Some(5.0),
        ..SearchConfig::default()
    };

    let a = run_pipeline(&split, &domain, &cube, &engine()).unwrap();
    let b = run_pipeline(&single, &domain, &cube, &engine()).unwrap();

    assert_eq!(a.detections.len(), b.detections.len());
    for (left, right) in a.detections.iter().zip(&b.detections) {
        assert_eq!(left.id, right.id);
        assert_eq!(left.voxel_count(), right.voxel_count());
        assert_eq!(left.global_min_corner(), right.global_min_corner());
        assert_relative_eq!(left.flux, right.flux);
        assert_relative_eq!(left.peak, right.peak);
    }
}
