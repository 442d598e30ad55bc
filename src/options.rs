//! Forest configuration.
//!
//! [`CcfOptions`] gathers every recognized training option as a typed
//! field. Use struct construction with `..Default::default()`:
//!
//! ```
//! use ccforest::{CcfOptions, SplitCriterion};
//!
//! let options = CcfOptions {
//!     n_trees: 50,
//!     bag_trees: true,
//!     split_criterion: SplitCriterion::Info,
//!     ..Default::default()
//! };
//! assert!(options.validate().is_ok());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logger::Verbosity;

// ============================================================================
// Enumerated option values
// ============================================================================

/// Purity metric used by the split evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitCriterion {
    /// Gini impurity (classification default).
    #[default]
    Gini,
    /// Information gain (Shannon entropy, base 2).
    Info,
    /// Sum-of-squared-error reduction (regression).
    Mse,
}

impl fmt::Display for SplitCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gini => write!(f, "gini"),
            Self::Info => write!(f, "info"),
            Self::Mse => write!(f, "mse"),
        }
    }
}

/// How to resolve ties between equally good split directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DirectionTieBreak {
    /// Uniformly at random among the tied directions.
    #[default]
    Rand,
    /// The first tied direction in column order.
    First,
}

/// Whether untransformed axes are offered as split candidates alongside
/// the fitted projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IncludeOriginalAxes {
    /// Use the fitted projection matrix directly.
    #[default]
    No,
    /// Append identity columns spanning the node's sampled features.
    Sampled,
    /// Expand back into the full feature space and append identity columns
    /// over every feature column still active in the subtree.
    All,
}

/// Whole-tree input rotation applied before induction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TreeRotationKind {
    /// No rotation.
    #[default]
    None,
    /// Random orthogonal rotation.
    Random,
    /// Principal component rotation.
    Pca,
    /// Rotation-Forest block-diagonal PCA.
    RotationForest,
}

/// Policy for missing feature values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MissingValues {
    /// Substitute the column mean once, upstream of all trees.
    #[default]
    Mean,
    /// Per tree, substitute draws from the column's empirical distribution.
    Random,
}

/// Depth limit for individual trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaxDepth {
    /// Grow until other termination criteria fire, guarded by a hard
    /// recursion limit of 490 levels.
    #[default]
    Stack,
    /// Explicit limit; `Depth(0)` turns every tree into a stump.
    Depth(u32),
}

/// Hard recursion guard used with [`MaxDepth::Stack`].
pub const STACK_DEPTH_GUARD: u32 = 490;

/// Per-node feature-group budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LambdaSelection {
    /// `ceil(log2(G) + 1)` of the `G` selectable groups.
    #[default]
    Log,
    /// `ceil(sqrt(G))` of the `G` selectable groups.
    Sqrt,
    /// A fixed number of groups.
    Fixed(usize),
}

impl LambdaSelection {
    /// Resolve the budget against the number of selectable groups.
    pub fn resolve(self, n_groups: usize) -> usize {
        if n_groups == 0 {
            return 0;
        }
        let lambda = match self {
            Self::Log => ((n_groups as f64).log2() + 1.0).ceil() as usize,
            Self::Sqrt => (n_groups as f64).sqrt().ceil() as usize,
            Self::Fixed(n) => n,
        };
        lambda.clamp(1, n_groups)
    }
}

/// Which projection kinds the node-level fitter produces.
///
/// All recognized kinds carry an explicit boolean; there is no implicit
/// default behind an absent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionKinds {
    /// Canonical correlation analysis between X and the target encoding.
    pub cca: bool,
    /// Principal components of the node's X bag.
    pub pca: bool,
    /// One CCA per class column against its single indicator.
    pub cca_classwise: bool,
    /// Identity directions over the sampled columns.
    pub original: bool,
    /// Random orthonormal directions.
    pub random: bool,
}

impl Default for ProjectionKinds {
    fn default() -> Self {
        Self {
            cca: true,
            pca: false,
            cca_classwise: false,
            original: false,
            random: false,
        }
    }
}

impl ProjectionKinds {
    /// No projection kind enabled.
    pub fn none() -> Self {
        Self {
            cca: false,
            pca: false,
            cca_classwise: false,
            original: false,
            random: false,
        }
    }

    /// Only the identity axes. Together with `proj_boot = false` this makes
    /// tree growth fully deterministic up to tie-breaks.
    pub fn original_only() -> Self {
        Self {
            original: true,
            ..Self::none()
        }
    }

    /// True iff any kind is enabled.
    pub fn any_enabled(&self) -> bool {
        self.cca || self.pca || self.cca_classwise || self.original || self.random
    }
}

/// Parameters for the Rotation-Forest tree rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationForestParams {
    /// Number of column blocks (`M`).
    pub groups: usize,
    /// Fraction of rows bootstrapped per block (`pS`).
    pub row_keep_fraction: f64,
    /// Probability of leaving each class out of a block's PCA bag.
    pub class_leave_out_fraction: f64,
}

impl Default for RotationForestParams {
    fn default() -> Self {
        Self {
            groups: 3,
            row_keep_fraction: 0.5,
            class_leave_out_fraction: 0.5,
        }
    }
}

// ============================================================================
// CcfOptions
// ============================================================================

/// Every recognized training option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcfOptions {
    /// Number of trees grown.
    pub n_trees: usize,
    /// A node with fewer rows becomes a leaf. Effective floor is 2.
    pub min_points_for_split: usize,
    /// Depth limit (or stack-guarded unlimited growth).
    pub max_depth: MaxDepth,
    /// Distinct feature groups sampled per node.
    pub lambda: LambdaSelection,
    /// Resample rows with replacement before fitting node projections.
    pub proj_boot: bool,
    /// When the projection bootstrap draws a degenerate bag, fall back to
    /// the unbagged rows instead of finalizing a leaf.
    pub continue_proj_boot_degenerate: bool,
    /// Tolerance below which a column counts as constant.
    pub x_variation_tol: f64,
    /// Purity metric for the split evaluator.
    pub split_criterion: SplitCriterion,
    /// Enabled projection kinds.
    pub projections: ProjectionKinds,
    /// Whether original axes are appended to the candidate directions.
    pub include_original_axes: IncludeOriginalAxes,
    /// Tie-break between equally good directions.
    pub dir_if_equal: DirectionTieBreak,
    /// Bootstrap rows per tree; the complement forms the OOB set.
    pub bag_trees: bool,
    /// Whole-tree input rotation.
    pub tree_rotation: TreeRotationKind,
    /// Parameters for [`TreeRotationKind::RotationForest`].
    pub rotation_forest: RotationForestParams,
    /// Missing-value policy.
    pub missing_values: MissingValues,
    /// Report OOB classification error per task instead of averaged.
    pub separate_task_predictions: bool,
    /// Start offsets of the multi-task class blocks. Empty means a single
    /// task spanning all classes.
    pub task_starts: Vec<usize>,
    /// Grow trees on rayon's thread pool.
    pub use_parallel: bool,
    /// Retain grown trees in the returned forest. Turned off together with
    /// a test matrix, trees are discarded after recording test predictions.
    pub keep_trees: bool,
    /// Forest-level seed; tree `i` derives its own generator from it.
    pub seed: u64,
    /// Progress output level.
    pub verbosity: Verbosity,
}

impl Default for CcfOptions {
    fn default() -> Self {
        Self {
            n_trees: 100,
            min_points_for_split: 2,
            max_depth: MaxDepth::Stack,
            lambda: LambdaSelection::Log,
            proj_boot: true,
            continue_proj_boot_degenerate: true,
            x_variation_tol: 1e-10,
            split_criterion: SplitCriterion::Gini,
            projections: ProjectionKinds::default(),
            include_original_axes: IncludeOriginalAxes::No,
            dir_if_equal: DirectionTieBreak::Rand,
            bag_trees: false,
            tree_rotation: TreeRotationKind::None,
            rotation_forest: RotationForestParams::default(),
            missing_values: MissingValues::Mean,
            separate_task_predictions: false,
            task_starts: Vec::new(),
            use_parallel: true,
            keep_trees: true,
            seed: 42,
            verbosity: Verbosity::Silent,
        }
    }
}

impl CcfOptions {
    /// Validate the option set.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found. Conflicts between options
    /// (no projections and no original axes) are configuration errors, not
    /// training-time failures.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_trees == 0 {
            return Err(ConfigError::ZeroTrees);
        }
        if self.min_points_for_split < 2 {
            return Err(ConfigError::MinPointsTooSmall(self.min_points_for_split));
        }
        if let LambdaSelection::Fixed(0) = self.lambda {
            return Err(ConfigError::ZeroLambda);
        }
        if !self.projections.any_enabled()
            && self.include_original_axes == IncludeOriginalAxes::No
        {
            return Err(ConfigError::NoDirections);
        }
        if !self.x_variation_tol.is_finite() || self.x_variation_tol < 0.0 {
            return Err(ConfigError::InvalidVariationTol(self.x_variation_tol));
        }
        if self.tree_rotation == TreeRotationKind::RotationForest {
            let rf = &self.rotation_forest;
            if rf.groups == 0 {
                return Err(ConfigError::ZeroRotationGroups);
            }
            for frac in [rf.row_keep_fraction, rf.class_leave_out_fraction] {
                if !(frac > 0.0 && frac <= 1.0) {
                    return Err(ConfigError::RotationFractionOutOfRange(frac));
                }
            }
        }
        if !self.task_starts.is_empty() {
            if self.task_starts[0] != 0 {
                return Err(ConfigError::InvalidTaskBoundaries);
            }
            if self.task_starts.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ConfigError::InvalidTaskBoundaries);
            }
        }
        Ok(())
    }

    /// Resolved task boundaries for a `k`-column target: start offsets of
    /// each block plus the terminating `k`.
    pub fn task_boundaries(&self, k: usize) -> Vec<usize> {
        let mut bounds = if self.task_starts.is_empty() {
            vec![0]
        } else {
            self.task_starts.clone()
        };
        bounds.push(k);
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        assert!(CcfOptions::default().validate().is_ok());
    }

    #[test]
    fn rejects_no_directions() {
        let options = CcfOptions {
            projections: ProjectionKinds::none(),
            include_original_axes: IncludeOriginalAxes::No,
            ..Default::default()
        };
        assert_eq!(options.validate(), Err(ConfigError::NoDirections));
    }

    #[test]
    fn original_axes_rescue_empty_projection_set() {
        let options = CcfOptions {
            projections: ProjectionKinds::none(),
            include_original_axes: IncludeOriginalAxes::All,
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn rejects_min_points_below_two() {
        let options = CcfOptions {
            min_points_for_split: 1,
            ..Default::default()
        };
        assert_eq!(options.validate(), Err(ConfigError::MinPointsTooSmall(1)));
    }

    #[test]
    fn rejects_bad_rotation_fraction() {
        let options = CcfOptions {
            tree_rotation: TreeRotationKind::RotationForest,
            rotation_forest: RotationForestParams {
                row_keep_fraction: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigError::RotationFractionOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_unsorted_task_starts() {
        let options = CcfOptions {
            task_starts: vec![0, 4, 2],
            ..Default::default()
        };
        assert_eq!(options.validate(), Err(ConfigError::InvalidTaskBoundaries));
    }

    #[test]
    fn lambda_resolution() {
        assert_eq!(LambdaSelection::Log.resolve(1), 1);
        assert_eq!(LambdaSelection::Log.resolve(8), 4);
        assert_eq!(LambdaSelection::Sqrt.resolve(9), 3);
        assert_eq!(LambdaSelection::Fixed(5).resolve(3), 3);
        assert_eq!(LambdaSelection::Fixed(2).resolve(10), 2);
    }

    #[test]
    fn task_boundaries_default_to_single_block() {
        let options = CcfOptions::default();
        assert_eq!(options.task_boundaries(4), vec![0, 4]);

        let multi = CcfOptions {
            task_starts: vec![0, 3],
            ..Default::default()
        };
        assert_eq!(multi.task_boundaries(5), vec![0, 3, 5]);
    }
}
