//! ccforest: canonical correlation forests for Rust.
//!
//! This crate trains ensembles of oblique decision trees whose internal
//! splits are computed on projection directions derived by canonical
//! correlation analysis (or related linear projections) between the
//! covariates and the class/target encoding at each node.
//!
//! # Example
//!
//! ```ignore
//! use ccforest::{CcfOptions, CcfTrainer};
//! use ndarray::array;
//!
//! let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
//! let labels = vec![0u32, 0, 1, 1];
//!
//! let trainer = CcfTrainer::new(CcfOptions::default())?;
//! let forest = trainer.fit_classification(x.view(), &labels)?;
//! let predicted = forest.predict_labels(x.view());
//! ```

pub mod data;
pub mod error;
pub mod forest;
pub mod io;
pub mod logger;
pub mod numeric;
pub mod options;
pub mod projection;
pub mod rotation;
pub mod split;
pub mod testing;
pub mod tree;

pub use error::{CcfError, ConfigError};
pub use forest::{CcForest, CcfTrainer, ModelKind, OobError};
pub use logger::{TrainingLogger, Verbosity};
pub use options::{
    CcfOptions, DirectionTieBreak, IncludeOriginalAxes, LambdaSelection, MaxDepth, MissingValues,
    ProjectionKinds, RotationForestParams, SplitCriterion, TreeRotationKind,
};
