//! Global fusion of boundary-split detections.
//!
//! The coordinator re-runs connected-component analysis over the union of all
//! edge detections' global voxel sets, using union-find over detection
//! indices. The operation is associative and commutative: the fused result is
//! identical no matter the order in which workers' lists arrived, and running
//! it on its own output changes nothing. Shared overlap voxels seen by two
//! workers are counted once.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::config::Connectivity;
use crate::detection::{Detection, Voxel};

/// Find the root of a detection index, compressing the path as it goes.
fn find_root(parent: &mut [usize], index: usize) -> usize {
    let mut current = index;
    while current != parent[current] {
        parent[current] = parent[parent[current]];
        current = parent[current];
    }
    current
}

/// Union two detection indices; the smaller root becomes the parent.
fn union(parent: &mut [usize], a: usize, b: usize) {
    let root_a = find_root(parent, a);
    let root_b = find_root(parent, b);
    if root_a < root_b {
        parent[root_b] = root_a;
    } else if root_b < root_a {
        parent[root_a] = root_b;
    }
}

/// Fuse edge detections whose voxel sets touch under the connectivity rule,
/// directly or through a chain of other edge detections.
///
/// Expects detections in global coordinates with their offsets already
/// applied. Growth/dilation never runs here even when enabled elsewhere: the
/// coordinator does not hold the full-resolution flux array needed to grow
/// correctly. An empty input is valid and yields an empty output.
pub fn merge_edge_detections(
    detections: Vec<Detection>,
    connectivity: Connectivity,
    growth_enabled: bool,
) -> Vec<Detection> {
    if growth_enabled {
        warn!(
            "growth is disabled during the global boundary merge: \
             the coordinator has no flux array to grow into"
        );
    }
    if detections.is_empty() {
        return Vec::new();
    }
    debug_assert!(detections
        .iter()
        .all(|d| d.offset.iter().all(|&o| o == 0)));

    let ndim = detections[0].ndim();
    let offsets = connectivity.offsets(ndim);
    let mut parent: Vec<usize> = (0..detections.len()).collect();

    // Voxel ownership map. A voxel seen by two detections (shared overlap
    // coverage) immediately unions them.
    let mut owner: HashMap<Vec<i64>, usize> = HashMap::new();
    for (index, det) in detections.iter().enumerate() {
        for voxel in &det.voxels {
            match owner.entry(voxel.pos.clone()) {
                std::collections::hash_map::Entry::Occupied(entry) => {
                    union(&mut parent, *entry.get(), index);
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(index);
                }
            }
        }
    }

    // Adjacency pass: a voxel neighboring another detection's voxel unions
    // the two.
    for (index, det) in detections.iter().enumerate() {
        for voxel in &det.voxels {
            for off in &offsets {
                let neighbor: Vec<i64> = voxel
                    .pos
                    .iter()
                    .zip(off)
                    .map(|(&p, &o)| p + o)
                    .collect();
                if let Some(&other) = owner.get(&neighbor) {
                    union(&mut parent, index, other);
                }
            }
        }
    }

    // Collect groups; BTreeMap keys give canonical voxel order and dedup.
    let mut groups: BTreeMap<usize, BTreeMap<Vec<i64>, f64>> = BTreeMap::new();
    for (index, det) in detections.into_iter().enumerate() {
        let root = find_root(&mut parent, index);
        let group = groups.entry(root).or_default();
        for voxel in det.voxels {
            group.insert(voxel.pos, voxel.value);
        }
    }

    let mut fused: Vec<Detection> = groups
        .into_values()
        .map(|voxel_map| {
            let voxels = voxel_map
                .into_iter()
                .map(|(pos, value)| Voxel { pos, value })
                .collect();
            let mut det = Detection::from_voxels(voxels, vec![0; ndim]);
            det.is_edge = true;
            det
        })
        .collect();

    // Canonical output order, independent of input order.
    fused.sort_by_key(|d| d.global_min_corner());
    debug!(fused = fused.len(), "edge detections merged");
    fused
}
