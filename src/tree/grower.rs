//! Recursive tree induction.
//!
//! `grow_tree` drives one tree over a (bagged, possibly rotated) training
//! matrix. At each node it:
//!
//! 1. applies the termination checks;
//! 2. subsamples feature groups, redrawing replacements for groups whose
//!    columns do not vary over the node's rows (such groups are disabled
//!    for the whole subtree);
//! 3. optionally bootstraps rows for the projection fit, falling back to
//!    the unbagged rows on a degenerate draw;
//! 4. fits projection directions, composes them with the original-axes
//!    policy, and projects the node's rows;
//! 5. runs the split evaluator and partitions the rows at a
//!    cancellation-robust threshold;
//! 6. recurses, threading an explicit [`PathContext`] of ancestral class
//!    proportions used to break leaf-label ties.
//!
//! The grower never mutates the options or any shared training state; all
//! per-path bookkeeping travels through explicit values.

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::error::CcfError;
use crate::numeric::{any_column_varies, column_varies, two_unique_rows, CLASS_MASS_TOL};
use crate::options::{CcfOptions, MaxDepth, STACK_DEPTH_GUARD};
use crate::projection::{compose_with_original_axes, fit_projections};
use crate::split::best_split;
use crate::tree::node::{LeafOutput, Node};

// ============================================================================
// PathContext
// ============================================================================

/// Ancestral class-proportion history along the recursion path.
///
/// Each internal node appends its own class proportions before recursing;
/// children inherit and extend the list. Leaves consult it newest-first to
/// break label ties deterministically.
#[derive(Debug, Clone, Default)]
pub struct PathContext {
    probs: Vec<Vec<f64>>,
}

impl PathContext {
    fn extended(&self, probs: Vec<f64>) -> Self {
        let mut out = self.clone();
        out.probs.push(probs);
        out
    }

    fn newest_first(&self) -> impl Iterator<Item = &Vec<f64>> {
        self.probs.iter().rev()
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Grow one tree over the full extent of `x`/`y`.
///
/// `feature_group` maps each column to its feature group (`None` =
/// disabled column); `tasks` holds the task block boundaries over the
/// target columns (`[0, k]` for single-task targets); `regression`
/// switches leaf outputs to target means.
pub fn grow_tree<'a, R: Rng>(
    x: ArrayView2<'a, f64>,
    y: ArrayView2<'a, f64>,
    feature_group: &[Option<u32>],
    tasks: &'a [usize],
    regression: bool,
    options: &'a CcfOptions,
    rng: &'a mut R,
) -> Result<Node, CcfError> {
    let n_groups = feature_group
        .iter()
        .flatten()
        .copied()
        .max()
        .map(|g| g as usize + 1)
        .unwrap_or(0);
    let mut group_cols: Vec<Vec<u32>> = vec![Vec::new(); n_groups];
    for (c, group) in feature_group.iter().enumerate() {
        if let Some(g) = group {
            group_cols[*g as usize].push(c as u32);
        }
    }

    let mut grower = Grower {
        x,
        y,
        options,
        group_cols,
        tasks,
        regression,
        rng,
    };
    let rows: Vec<usize> = (0..x.nrows()).collect();
    let disabled = vec![false; n_groups];
    grower.grow(rows, &disabled, 1, &PathContext::default())
}

// ============================================================================
// Grower
// ============================================================================

struct Grower<'a, R: Rng> {
    x: ArrayView2<'a, f64>,
    y: ArrayView2<'a, f64>,
    options: &'a CcfOptions,
    /// Columns belonging to each feature group.
    group_cols: Vec<Vec<u32>>,
    /// Task block boundaries over the target columns.
    tasks: &'a [usize],
    regression: bool,
    rng: &'a mut R,
}

impl<R: Rng> Grower<'_, R> {
    fn grow(
        &mut self,
        rows: Vec<usize>,
        disabled: &[bool],
        depth: u32,
        path: &PathContext,
    ) -> Result<Node, CcfError> {
        let n = rows.len();
        let counts = self.column_sums(&rows);

        if self.must_terminate(&rows, depth)? {
            return Ok(self.make_leaf(&rows, counts, path));
        }

        // Feature subsample with variance-based resampling. Groups whose
        // columns are all constant over this bag are disabled for the whole
        // subtree and replaced from the remaining pool.
        let mut local_disabled: Option<Vec<bool>> = None;
        let chosen = self.sample_feature_groups(&rows, disabled, &mut local_disabled);
        let effective_disabled = local_disabled.as_deref().unwrap_or(disabled);

        let tol = self.options.x_variation_tol;
        let mut in_cols: Vec<u32> = Vec::new();
        for &g in &chosen {
            for &c in &self.group_cols[g as usize] {
                if column_varies(self.x.column(c as usize), &rows, tol) {
                    in_cols.push(c);
                }
            }
        }
        in_cols.sort_unstable();
        if in_cols.is_empty() {
            return Ok(self.make_leaf(&rows, counts, path));
        }

        // Projection bootstrap.
        let proj_rows = if self.options.proj_boot {
            let boot: Vec<usize> = (0..n)
                .map(|_| rows[self.rng.gen_range(0..n)])
                .collect();
            if self.bag_is_degenerate(&boot, &in_cols) {
                if !self.options.continue_proj_boot_degenerate {
                    return Ok(self.make_leaf(&rows, counts, path));
                }
                rows.clone()
            } else {
                boot
            }
        } else {
            rows.clone()
        };

        // Two unique rows in the projection bag: maximum-margin hyperplane
        // perpendicular to the difference vector, partition midway along
        // it. The full node rows are still the ones partitioned.
        if self.options.projections.any_enabled() {
            if let Some((a, b)) = two_unique_rows(self.x, &proj_rows, &in_cols, tol) {
                return self.two_point_split(
                    rows,
                    counts,
                    &in_cols,
                    (a, b),
                    effective_disabled,
                    depth,
                    path,
                );
            }
        }

        // Fit candidate directions on the projection bag, then project the
        // full (unbagged) node rows.
        let x_proj = self.gather(&proj_rows, &in_cols);
        let y_proj = self.gather_targets(&proj_rows);
        let fitted = fit_projections(
            x_proj.view(),
            y_proj.view(),
            &self.options.projections,
            self.rng,
        );
        if fitted.iter().any(|v| !v.is_finite()) {
            return Err(CcfError::Internal("projection produced non-finite entries"));
        }

        let active_cols = self.active_columns(effective_disabled);
        let (node_cols, projections) = compose_with_original_axes(
            fitted,
            &in_cols,
            self.options.include_original_axes,
            &active_cols,
        );
        if projections.ncols() == 0 {
            return Ok(self.make_leaf(&rows, counts, path));
        }

        let u = self.gather(&rows, &node_cols).dot(&projections);
        let all: Vec<usize> = (0..n).collect();
        let kept: Vec<usize> = (0..u.ncols())
            .filter(|&j| column_varies(u.column(j), &all, tol))
            .collect();
        if kept.is_empty() {
            return Ok(self.make_leaf(&rows, counts, path));
        }
        let u_kept = u.select(ndarray::Axis(1), &kept);

        let y_node = self.gather_targets(&rows);
        let choice = match best_split(
            u_kept.view(),
            y_node.view(),
            self.options.split_criterion,
            tol,
            self.options.dir_if_equal,
            self.rng,
        ) {
            Some(choice) => choice,
            None => return Ok(self.make_leaf(&rows, counts, path)),
        };

        let partition = choice.partition();
        if !partition.is_finite() {
            return Err(CcfError::Internal("non-finite partition point"));
        }
        let direction = kept[choice.direction];

        let mut left_rows = Vec::new();
        let mut right_rows = Vec::new();
        for (i, &row) in rows.iter().enumerate() {
            if u[[i, direction]] <= partition {
                left_rows.push(row);
            } else {
                right_rows.push(row);
            }
        }
        if left_rows.is_empty() || right_rows.is_empty() {
            return Err(CcfError::Internal("split produced an empty child"));
        }

        let child_path = path.extended(proportions(&counts));
        let left = self.grow(left_rows, effective_disabled, depth + 1, &child_path)?;
        let right = self.grow(right_rows, effective_disabled, depth + 1, &child_path)?;

        Ok(Node::Branch {
            in_cols: node_cols,
            projection: projections.column(direction).to_vec(),
            partition,
            counts,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Early-termination checks. `Ok(true)` means "finalize a leaf";
    /// exhausting the stack-depth guard is an error instead.
    fn must_terminate(&self, rows: &[usize], depth: u32) -> Result<bool, CcfError> {
        let n = rows.len();
        if n < self.options.min_points_for_split.max(2) {
            return Ok(true);
        }
        if self.class_mass_count(rows) <= self.mass_floor() {
            return Ok(true);
        }
        match self.options.max_depth {
            MaxDepth::Depth(limit) => {
                if depth > limit {
                    return Ok(true);
                }
            }
            MaxDepth::Stack => {
                if depth > STACK_DEPTH_GUARD {
                    return Err(CcfError::DepthExhausted { depth });
                }
            }
        }
        Ok(false)
    }

    /// Number of target columns carrying non-negligible absolute mass.
    fn class_mass_count(&self, rows: &[usize]) -> usize {
        (0..self.y.ncols())
            .filter(|&c| {
                rows.iter().map(|&r| self.y[[r, c]].abs()).sum::<f64>() > CLASS_MASS_TOL
            })
            .count()
    }

    /// A node is degenerate with at most this many massive columns: one
    /// for classification (a single surviving class), one for multi-output
    /// regression (targets are centered, so a constant output has no
    /// mass), zero for a single regression output.
    fn mass_floor(&self) -> usize {
        if self.regression {
            usize::from(self.y.ncols() > 1)
        } else {
            1
        }
    }

    fn bag_is_degenerate(&self, rows: &[usize], in_cols: &[u32]) -> bool {
        if self.class_mass_count(rows) <= self.mass_floor() {
            return true;
        }
        !any_column_varies(self.x, rows, in_cols, self.options.x_variation_tol)
    }

    /// Draw feature groups without replacement, replacing groups whose
    /// columns do not vary. Dead groups are recorded in `local_disabled`
    /// (cloned from the inherited state on first write).
    fn sample_feature_groups(
        &mut self,
        rows: &[usize],
        disabled: &[bool],
        local_disabled: &mut Option<Vec<bool>>,
    ) -> Vec<u32> {
        let selectable: Vec<u32> = (0..self.group_cols.len())
            .filter(|&g| !disabled[g] && !self.group_cols[g].is_empty())
            .map(|g| g as u32)
            .collect();
        if selectable.is_empty() {
            return Vec::new();
        }

        let lambda = self.options.lambda.resolve(selectable.len());
        let mut chosen = sample_without_replacement(&selectable, lambda, self.rng);
        let mut pool: Vec<u32> = selectable
            .iter()
            .copied()
            .filter(|g| !chosen.contains(g))
            .collect();

        let tol = self.options.x_variation_tol;
        loop {
            let (alive, dead): (Vec<u32>, Vec<u32>) = chosen.iter().partition(|&&g| {
                self.group_cols[g as usize]
                    .iter()
                    .any(|&c| column_varies(self.x.column(c as usize), rows, tol))
            });
            if dead.is_empty() {
                return alive;
            }

            let state = local_disabled.get_or_insert_with(|| disabled.to_vec());
            for &g in &dead {
                state[g as usize] = true;
            }

            chosen = alive;
            if pool.is_empty() {
                return chosen;
            }
            let need = (lambda - chosen.len()).min(pool.len());
            if need == 0 {
                return chosen;
            }
            let drawn = sample_without_replacement(&pool, need, self.rng);
            pool.retain(|g| !drawn.contains(g));
            chosen.extend(drawn);
        }
    }

    /// Every feature column whose group is still active in this subtree.
    fn active_columns(&self, disabled: &[bool]) -> Vec<u32> {
        let mut cols: Vec<u32> = (0..self.group_cols.len())
            .filter(|&g| !disabled[g])
            .flat_map(|g| self.group_cols[g].iter().copied())
            .collect();
        cols.sort_unstable();
        cols
    }

    fn two_point_split(
        &mut self,
        rows: Vec<usize>,
        counts: Vec<f64>,
        in_cols: &[u32],
        unique: (usize, usize),
        disabled: &[bool],
        depth: u32,
        path: &PathContext,
    ) -> Result<Node, CcfError> {
        let (a, b) = unique;
        let projection: Vec<f64> = in_cols
            .iter()
            .map(|&c| self.x[[b, c as usize]] - self.x[[a, c as usize]])
            .collect();
        let midpoint: f64 = in_cols
            .iter()
            .zip(&projection)
            .map(|(&c, w)| w * 0.5 * (self.x[[a, c as usize]] + self.x[[b, c as usize]]))
            .sum();
        if !midpoint.is_finite() {
            return Err(CcfError::Internal("non-finite partition point"));
        }

        let mut left_rows = Vec::new();
        let mut right_rows = Vec::new();
        for &row in &rows {
            let score: f64 = in_cols
                .iter()
                .zip(&projection)
                .map(|(&c, w)| w * self.x[[row, c as usize]])
                .sum();
            if score <= midpoint {
                left_rows.push(row);
            } else {
                right_rows.push(row);
            }
        }
        if left_rows.is_empty() || right_rows.is_empty() {
            return Err(CcfError::Internal("split produced an empty child"));
        }

        let child_path = path.extended(proportions(&counts));
        let left = self.grow(left_rows, disabled, depth + 1, &child_path)?;
        let right = self.grow(right_rows, disabled, depth + 1, &child_path)?;

        Ok(Node::Branch {
            in_cols: in_cols.to_vec(),
            projection,
            partition: midpoint,
            counts,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn make_leaf(&mut self, rows: &[usize], counts: Vec<f64>, path: &PathContext) -> Node {
        let output = if self.regression {
            let n = rows.len().max(1) as f64;
            let means = (0..self.y.ncols())
                .map(|c| rows.iter().map(|&r| self.y[[r, c]]).sum::<f64>() / n)
                .collect();
            LeafOutput::Mean(means)
        } else {
            let labels = self
                .tasks
                .windows(2)
                .map(|w| self.pick_label(&counts, path, w[0], w[1]))
                .collect();
            LeafOutput::Classes(labels)
        };
        Node::Leaf { counts, output }
    }

    /// Class with maximum count within one task block; ties consult the
    /// ancestral history newest-first, then fall back to a vanishing
    /// random perturbation. Returns a global class column index.
    fn pick_label(&mut self, counts: &[f64], path: &PathContext, start: usize, end: usize) -> u32 {
        let block = &counts[start..end];
        if block.len() <= 1 || unique_argmax(block).is_some() {
            return (start + argmax(block)) as u32;
        }

        let mut adjusted = block.to_vec();
        for probs in path.newest_first() {
            for (i, a) in adjusted.iter_mut().enumerate() {
                *a += probs[start + i] / 1e9;
            }
            if unique_argmax(&adjusted).is_some() {
                return (start + argmax(&adjusted)) as u32;
            }
        }
        for a in adjusted.iter_mut() {
            *a += self.rng.gen::<f64>() / 1e9;
        }
        (start + argmax(&adjusted)) as u32
    }

    fn column_sums(&self, rows: &[usize]) -> Vec<f64> {
        (0..self.y.ncols())
            .map(|c| rows.iter().map(|&r| self.y[[r, c]]).sum())
            .collect()
    }

    fn gather(&self, rows: &[usize], cols: &[u32]) -> Array2<f64> {
        Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| {
            self.x[[rows[i], cols[j] as usize]]
        })
    }

    fn gather_targets(&self, rows: &[usize]) -> Array2<f64> {
        Array2::from_shape_fn((rows.len(), self.y.ncols()), |(i, c)| {
            self.y[[rows[i], c]]
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Sample `k` items without replacement via a partial Fisher-Yates
/// shuffle. Returns sorted values.
fn sample_without_replacement<R: Rng>(items: &[u32], k: usize, rng: &mut R) -> Vec<u32> {
    if k >= items.len() {
        let mut all = items.to_vec();
        all.sort_unstable();
        return all;
    }
    let mut indices: Vec<usize> = (0..items.len()).collect();
    for i in 0..k {
        let j = rng.gen_range(i..items.len());
        indices.swap(i, j);
    }
    let mut sampled: Vec<u32> = indices[..k].iter().map(|&i| items[i]).collect();
    sampled.sort_unstable();
    sampled
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn unique_argmax(values: &[f64]) -> Option<usize> {
    let best = argmax(values);
    let ties = values.iter().filter(|&&v| v == values[best]).count();
    (ties == 1).then_some(best)
}

fn proportions(counts: &[f64]) -> Vec<f64> {
    let total: f64 = counts.iter().sum();
    if total.abs() < f64::MIN_POSITIVE {
        return vec![0.0; counts.len()];
    }
    counts.iter().map(|&c| c / total).collect()
}

// ============================================================================
// Tests
// ============================================================================
