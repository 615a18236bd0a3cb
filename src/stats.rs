//! Per-worker statistics and the pooled global threshold.
//!
//! Each worker summarizes its assigned (non-overlap) pixels as a
//! [`StatsPartial`]; in global-threshold mode the coordinator pools the
//! partials with count weighting and broadcasts the derived threshold. Robust
//! estimation (median / MADFM) is a configuration choice; pooling is
//! estimator-agnostic.

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// MADFM-to-sigma correction for Gaussian noise: madfm = 0.6744888 * sigma.
const MADFM_TO_SIGMA: f64 = 0.674_488_8;

/// Per-worker aggregate over valid (non-NaN) pixels.
///
/// `location` and `spread` are mean/stddev or median/MADFM-as-sigma depending
/// on the robust flag; a zero `count` marks an empty sample explicitly so the
/// coordinator can exclude it from pooling instead of receiving NaNs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsPartial {
    pub count: u64,
    pub location: f64,
    pub spread: f64,
}

impl StatsPartial {
    /// Summarize a pixel sample. NaN pixels (blanked or masked) are excluded.
    pub fn from_pixels<I>(pixels: I, robust: bool) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let valid: Vec<f64> = pixels.into_iter().filter(|v| !v.is_nan()).collect();
        if valid.is_empty() {
            return Self {
                count: 0,
                location: 0.0,
                spread: 0.0,
            };
        }

        if robust {
            let location = median(&valid);
            let deviations: Vec<f64> = valid.iter().map(|v| (v - location).abs()).collect();
            let spread = median(&deviations) / MADFM_TO_SIGMA;
            Self {
                count: valid.len() as u64,
                location,
                spread,
            }
        } else {
            let n = valid.len() as f64;
            let mean = valid.iter().sum::<f64>() / n;
            let variance = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            Self {
                count: valid.len() as u64,
                location: mean,
                spread: variance.sqrt(),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Median of a non-empty slice. Averages the two middle values for
/// even-length input.
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Count-weighted combination of per-worker partials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PooledStats {
    pub count: u64,
    pub location: f64,
    pub spread: f64,
}

/// Pool partial statistics from all workers.
///
/// Zero-count partials are excluded from the weighted combination; if every
/// partial is empty the global threshold is undefined and this fails with
/// [`SearchError::Aggregation`]. The pooled location is the count-weighted
/// mean of locations; the pooled spread is the square root of the
/// count-weighted mean of squared spreads.
pub fn pool_partials(partials: &[StatsPartial]) -> Result<PooledStats, SearchError> {
    let contributing: Vec<&StatsPartial> =
        partials.iter().filter(|p| !p.is_empty()).collect();
    if contributing.is_empty() {
        return Err(SearchError::Aggregation(format!(
            "all {} workers reported zero-count statistics; global threshold is undefined",
            partials.len()
        )));
    }

    let total: u64 = contributing.iter().map(|p| p.count).sum();
    let weight_sum = total as f64;
    let location = contributing
        .iter()
        .map(|p| p.count as f64 * p.location)
        .sum::<f64>()
        / weight_sum;
    let pooled_variance = contributing
        .iter()
        .map(|p| p.count as f64 * p.spread * p.spread)
        .sum::<f64>()
        / weight_sum;

    Ok(PooledStats {
        count: total,
        location,
        spread: pooled_variance.sqrt(),
    })
}

/// The single scalar threshold broadcast to every worker, with the pooled
/// estimates it was derived from. Immutable once published for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalThreshold {
    pub value: f64,
    pub location: f64,
    pub spread: f64,
}

/// Derive the detection threshold from pooled statistics and an S/N cut.
pub fn derive_threshold(pooled: &PooledStats, snr_cut: f64) -> GlobalThreshold {
    GlobalThreshold {
        value: pooled.location + snr_cut * pooled.spread,
        location: pooled.location,
        spread: pooled.spread,
    }
}
