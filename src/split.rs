//! Split evaluation over projected node data.
//!
//! Given the node's rows projected onto each candidate direction, find the
//! best sorted split per direction and pick the winning direction:
//!
//! 1. Sort rows by the projected value.
//! 2. Scan candidates `k` (rows in the left child), accumulating class
//!    counts (classification) or moment sums (regression).
//! 3. A candidate is legal only when the sorted gap at `k` exceeds the
//!    variation tolerance; illegal candidates get `-inf` gain.
//! 4. Gain is the parent impurity minus the count-weighted child mean.
//!
//! Ties among a direction's argmax candidates break uniformly at random;
//! ties between directions break per [`DirectionTieBreak`], with gains
//! compared under a `10 * eps` relative tolerance. A best gain below zero
//! means the node cannot usefully split.

use ndarray::ArrayView2;
use rand::Rng;

use crate::numeric::{gains_tied, partition_point};
use crate::options::{DirectionTieBreak, SplitCriterion};

// ============================================================================
// SplitChoice
// ============================================================================

/// Winning direction and partition bracket of a split search.
#[derive(Debug, Clone, Copy)]
pub struct SplitChoice {
    /// Column of `U` the node splits on.
    pub direction: usize,
    /// Gain of the winning candidate.
    pub gain: f64,
    /// Largest projected value in the left child.
    pub lo: f64,
    /// Smallest projected value in the right child.
    pub hi: f64,
}

impl SplitChoice {
    /// Partition threshold, computed with cancellation-robust arithmetic
    /// so it stays strictly between `lo` and `hi`.
    pub fn partition(&self) -> f64 {
        partition_point(self.lo, self.hi)
    }
}

#[derive(Debug, Clone, Copy)]
struct DirectionBest {
    gain: f64,
    lo: f64,
    hi: f64,
}

// ============================================================================
// Impurity metrics
// ============================================================================

/// Gini impurity of a count vector: `1 - sum(p^2)`.
fn gini(counts: &[f64]) -> f64 {
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c / total;
            p * p
        })
        .sum::<f64>()
}

/// Shannon entropy of a count vector in bits, with `0 log 0 = 0`.
fn entropy(counts: &[f64]) -> f64 {
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    -counts
        .iter()
        .filter(|&&c| c > 0.0)
        .map(|&c| {
            let p = c / total;
            p * p.log2()
        })
        .sum::<f64>()
}

/// Summed per-output variance from moment sums over `n` rows.
fn variance(sums: &[f64], sum_sqs: &[f64], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let inv = 1.0 / n as f64;
    sums.iter()
        .zip(sum_sqs)
        .map(|(&s, &sq)| (sq * inv - (s * inv) * (s * inv)).max(0.0))
        .sum()
}

fn count_impurity(counts: &[f64], criterion: SplitCriterion) -> f64 {
    match criterion {
        SplitCriterion::Gini => gini(counts),
        SplitCriterion::Info => entropy(counts),
        SplitCriterion::Mse => unreachable!("mse uses moment sums"),
    }
}

// ============================================================================
// Per-direction scan
// ============================================================================

/// Best legal candidate along one direction, or `None` when every gap is
/// within tolerance.
fn scan_direction<R: Rng>(
    u_col: &[f64],
    y: ArrayView2<'_, f64>,
    criterion: SplitCriterion,
    tol: f64,
    rng: &mut R,
) -> Option<DirectionBest> {
    let n = u_col.len();
    let k_outputs = y.ncols();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| u_col[a].total_cmp(&u_col[b]));

    // Parent statistics.
    let mut total_counts = vec![0.0; k_outputs];
    let mut total_sqs = vec![0.0; k_outputs];
    for row in y.rows() {
        for (c, &v) in row.iter().enumerate() {
            total_counts[c] += v;
            total_sqs[c] += v * v;
        }
    }
    let parent = match criterion {
        SplitCriterion::Mse => variance(&total_counts, &total_sqs, n),
        _ => count_impurity(&total_counts, criterion),
    };

    let mut left = vec![0.0; k_outputs];
    let mut left_sqs = vec![0.0; k_outputs];
    let mut right = total_counts.clone();
    let mut right_sqs = total_sqs.clone();

    let mut best_gain = f64::NEG_INFINITY;
    let mut candidates: Vec<(f64, f64)> = Vec::new();

    for k in 1..n {
        let moved = order[k - 1];
        for c in 0..k_outputs {
            let v = y[[moved, c]];
            left[c] += v;
            right[c] -= v;
            left_sqs[c] += v * v;
            right_sqs[c] -= v * v;
        }

        let lo = u_col[order[k - 1]];
        let hi = u_col[order[k]];
        if !(hi - lo > tol) {
            continue;
        }

        let (left_metric, right_metric) = match criterion {
            SplitCriterion::Mse => (
                variance(&left, &left_sqs, k),
                variance(&right, &right_sqs, n - k),
            ),
            _ => (count_impurity(&left, criterion), count_impurity(&right, criterion)),
        };
        let gain =
            parent - (k as f64 * left_metric + (n - k) as f64 * right_metric) / n as f64;

        if candidates.is_empty() || (gain > best_gain && !gains_tied(gain, best_gain)) {
            best_gain = gain;
            candidates.clear();
            candidates.push((lo, hi));
        } else if gains_tied(gain, best_gain) {
            candidates.push((lo, hi));
        }
    }

    if candidates.is_empty() {
        return None;
    }
    let pick = if candidates.len() == 1 {
        0
    } else {
        rng.gen_range(0..candidates.len())
    };
    let (lo, hi) = candidates[pick];
    Some(DirectionBest {
        gain: best_gain,
        lo,
        hi,
    })
}

// ============================================================================
// Cross-direction choice
// ============================================================================

/// Evaluate every direction of `u` and return the winning split, or `None`
/// when no direction offers a non-negative gain.
pub fn best_split<R: Rng>(
    u: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    criterion: SplitCriterion,
    tol: f64,
    tie: DirectionTieBreak,
    rng: &mut R,
) -> Option<SplitChoice> {
    let n = u.nrows();
    if n < 2 {
        return None;
    }

    let mut bests: Vec<Option<DirectionBest>> = Vec::with_capacity(u.ncols());
    for col in u.columns() {
        let values: Vec<f64> = col.to_vec();
        bests.push(scan_direction(&values, y, criterion, tol, rng));
    }

    let max_gain = bests
        .iter()
        .flatten()
        .map(|b| b.gain)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max_gain.is_finite() || max_gain < 0.0 {
        return None;
    }

    let tied: Vec<usize> = bests
        .iter()
        .enumerate()
        .filter_map(|(j, b)| b.as_ref().map(|b| (j, b.gain)))
        .filter(|&(_, g)| gains_tied(g, max_gain))
        .map(|(j, _)| j)
        .collect();

    let direction = match tie {
        DirectionTieBreak::First => tied[0],
        DirectionTieBreak::Rand => {
            if tied.len() == 1 {
                tied[0]
            } else {
                tied[rng.gen_range(0..tied.len())]
            }
        }
    };

    let chosen = bests[direction].as_ref().expect("tied direction has a best");
    Some(SplitChoice {
        direction,
        gain: chosen.gain,
        lo: chosen.lo,
        hi: chosen.hi,
    })
}

// ============================================================================
// Tests
// ============================================================================
