//! Error types for forest construction.
//!
//! Configuration problems are rejected before any tree is grown. Internal
//! invariant violations abort the build: no partial forest is returned.

use thiserror::Error;

/// Errors detected while validating [`CcfOptions`](crate::CcfOptions).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// No projection kind is enabled and original axes are excluded, so no
    /// candidate split direction could ever be produced.
    #[error("no projections enabled and original axes are excluded")]
    NoDirections,

    /// The forest must contain at least one tree.
    #[error("n_trees must be positive")]
    ZeroTrees,

    /// A node can only be split when both children receive at least one row.
    #[error("min_points_for_split must be at least 2, got {0}")]
    MinPointsTooSmall(usize),

    /// A fixed per-node feature budget of zero selects nothing.
    #[error("lambda must select at least one feature group")]
    ZeroLambda,

    /// Rotation-Forest needs at least one column block.
    #[error("rotation-forest group count must be positive")]
    ZeroRotationGroups,

    /// Rotation-Forest sampling fractions live in (0, 1].
    #[error("rotation-forest fraction out of range (0, 1]: {0}")]
    RotationFractionOutOfRange(f64),

    /// The variation tolerance must be a finite, non-negative number.
    #[error("x_variation_tol must be finite and non-negative, got {0}")]
    InvalidVariationTol(f64),

    /// Multi-task boundaries must start at zero and strictly increase.
    #[error("task boundaries must start at 0 and be strictly increasing")]
    InvalidTaskBoundaries,
}

/// Errors raised while training a forest.
#[derive(Debug, Error)]
pub enum CcfError {
    /// Invalid options (see [`ConfigError`]).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The training matrix has no rows or no columns.
    #[error("training data is empty")]
    EmptyTrainingData,

    /// X and Y disagree on the number of rows.
    #[error("X has {x_rows} rows but Y has {y_rows}")]
    ShapeMismatch { x_rows: usize, y_rows: usize },

    /// The recursion guard tripped while growing with `MaxDepth::Stack`.
    #[error("tree depth {depth} exceeded the recursion guard; set a numeric max_depth")]
    DepthExhausted { depth: u32 },

    /// An internal invariant was violated. This indicates a bug; the build
    /// is aborted and no partial forest is kept.
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}
