//! Forest driver: training, aggregation, out-of-bag error.
//!
//! [`CcfTrainer`] owns a validated option set and grows a [`CcForest`]:
//! inputs are processed once (standardization, categorical expansion),
//! targets are one-hot encoded or standardized, and every tree is grown
//! from a deterministic per-tree seed so that serial and parallel builds
//! produce identical forests.
//!
//! # Example
//!
//! ```ignore
//! let trainer = CcfTrainer::new(CcfOptions { n_trees: 50, bag_trees: true, ..Default::default() })?;
//! let forest = trainer.fit_classification(x.view(), &labels)?;
//! println!("oob error: {:?}", forest.oob_error());
//! ```

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{encode_labels, ProcessDetails};
use crate::error::{CcfError, ConfigError};
use crate::logger::TrainingLogger;
use crate::numeric::nan_safe_moments;
use crate::options::{CcfOptions, MissingValues};
use crate::tree::{grow_forest_tree, predict_matrix, Cct};

// ============================================================================
// Model types
// ============================================================================

/// What the forest was trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    Classification,
    Regression,
}

/// Out-of-bag error of a bagged forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OobError {
    /// Fractional misclassification, averaged over tasks.
    Classification(f64),
    /// Fractional misclassification per task
    /// (`separate_task_predictions`).
    PerTask(Vec<f64>),
    /// Mean squared error per output, on the unstandardized scale.
    Regression(Vec<f64>),
}

/// Standardization applied to regression targets at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetScaling {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

// ============================================================================
// CcForest
// ============================================================================

/// A trained canonical correlation forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcForest {
    kind: ModelKind,
    options: CcfOptions,
    trees: Vec<Cct>,
    details: ProcessDetails,
    class_names: Vec<String>,
    class_values: Vec<u32>,
    /// Task block boundaries over the class dimension: `[0, ..., k]`.
    task_boundaries: Vec<usize>,
    target_scaling: Option<TargetScaling>,
    oob_error: Option<OobError>,
}

impl CcForest {
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Number of target columns (classes, or regression outputs).
    pub fn n_outputs(&self) -> usize {
        self.task_boundaries[self.task_boundaries.len() - 1]
    }

    /// Number of expanded feature columns the forest was trained on.
    pub fn n_features(&self) -> usize {
        self.details.n_expanded()
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn options(&self) -> &CcfOptions {
        &self.options
    }

    pub fn trees(&self) -> &[Cct] {
        &self.trees
    }

    /// OOB error, when bagging was on and trees were retained.
    pub fn oob_error(&self) -> Option<&OobError> {
        self.oob_error.as_ref()
    }

    /// Forest outputs for a raw test matrix.
    ///
    /// Classification: mean per-class vote across trees (probabilities).
    /// Regression: mean prediction, un-standardized.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let processed = self.details.transform(x);
        let k = self.n_outputs();
        let mut sums = Array2::zeros((processed.nrows(), k));
        for tree in &self.trees {
            sums += &predict_matrix(tree, processed.view(), k);
        }
        sums /= self.trees.len().max(1) as f64;

        if let Some(scaling) = &self.target_scaling {
            for (j, mut col) in sums.columns_mut().into_iter().enumerate() {
                col.mapv_inplace(|v| v * scaling.std[j] + scaling.mean[j]);
            }
        }
        sums
    }

    /// Per-task predicted class columns (global indices into the class
    /// dimension). Ties go to the first class of the tied set.
    pub fn predict_labels(&self, x: ArrayView2<'_, f64>) -> Array2<u32> {
        let scores = self.predict(x);
        let n_tasks = self.task_boundaries.len() - 1;
        let mut out = Array2::zeros((scores.nrows(), n_tasks));
        for i in 0..scores.nrows() {
            for t in 0..n_tasks {
                let (start, end) = (self.task_boundaries[t], self.task_boundaries[t + 1]);
                out[[i, t]] = argmax_range(scores.row(i), start, end) as u32;
            }
        }
        out
    }

    /// Predicted label values for a single-task classification forest.
    pub fn predict_classes(&self, x: ArrayView2<'_, f64>) -> Vec<u32> {
        let labels = self.predict_labels(x);
        labels
            .column(0)
            .iter()
            .map(|&c| self.class_values[c as usize])
            .collect()
    }
}

// ============================================================================
// CcfTrainer
// ============================================================================

/// Grows [`CcForest`]s from a validated option set.
pub struct CcfTrainer {
    options: CcfOptions,
    is_ordinal: Vec<bool>,
}

impl CcfTrainer {
    /// Create a trainer, validating the options up front.
    pub fn new(options: CcfOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            options,
            is_ordinal: Vec::new(),
        })
    }

    /// Declare which input columns are ordinal; the rest are expanded as
    /// categorical. By default every column is ordinal.
    pub fn with_ordinal_flags(mut self, flags: Vec<bool>) -> Self {
        self.is_ordinal = flags;
        self
    }

    /// Train a classifier from integer labels.
    pub fn fit_classification(
        &self,
        x: ArrayView2<'_, f64>,
        labels: &[u32],
    ) -> Result<CcForest, CcfError> {
        let (forest, _) = self.fit_classification_impl(x, labels, None)?;
        Ok(forest)
    }

    /// Train a classifier and predict on a test matrix in one pass.
    ///
    /// With `keep_trees = false` each tree is discarded right after its
    /// test votes are recorded, so the returned forest holds no trees.
    /// Returns the mean per-class votes on the test matrix.
    pub fn fit_predict_classification(
        &self,
        x: ArrayView2<'_, f64>,
        labels: &[u32],
        x_test: ArrayView2<'_, f64>,
    ) -> Result<(CcForest, Array2<f64>), CcfError> {
        let (forest, predictions) = self.fit_classification_impl(x, labels, Some(x_test))?;
        Ok((forest, predictions.expect("test matrix was provided")))
    }

    /// Train a multi-task classifier from an already one-hot target
    /// matrix, partitioned by `options.task_starts`.
    pub fn fit_multitask(
        &self,
        x: ArrayView2<'_, f64>,
        y_onehot: ArrayView2<'_, f64>,
    ) -> Result<CcForest, CcfError> {
        let k = y_onehot.ncols();
        let class_values: Vec<u32> = (0..k as u32).collect();
        let class_names: Vec<String> = class_values.iter().map(|v| v.to_string()).collect();
        let (forest, _) = self.train(
            x,
            y_onehot.to_owned(),
            ModelKind::Classification,
            class_values,
            class_names,
            None,
        )?;
        Ok(forest)
    }

    /// Train a regressor on (possibly multi-output) real targets.
    pub fn fit_regression(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<CcForest, CcfError> {
        let (forest, _) = self.fit_regression_impl(x, y, None)?;
        Ok(forest)
    }

    /// Train a regressor and predict on a test matrix in one pass; see
    /// [`Self::fit_predict_classification`] for the `keep_trees` contract.
    pub fn fit_predict_regression(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        x_test: ArrayView2<'_, f64>,
    ) -> Result<(CcForest, Array2<f64>), CcfError> {
        let (forest, predictions) = self.fit_regression_impl(x, y, Some(x_test))?;
        Ok((forest, predictions.expect("test matrix was provided")))
    }

    fn fit_classification_impl(
        &self,
        x: ArrayView2<'_, f64>,
        labels: &[u32],
        x_test: Option<ArrayView2<'_, f64>>,
    ) -> Result<(CcForest, Option<Array2<f64>>), CcfError> {
        if labels.len() != x.nrows() {
            return Err(CcfError::ShapeMismatch {
                x_rows: x.nrows(),
                y_rows: labels.len(),
            });
        }
        let (y, class_values, class_names) = encode_labels(labels);
        self.train(
            x,
            y,
            ModelKind::Classification,
            class_values,
            class_names,
            x_test,
        )
    }

    fn fit_regression_impl(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        x_test: Option<ArrayView2<'_, f64>>,
    ) -> Result<(CcForest, Option<Array2<f64>>), CcfError> {
        self.train(
            x,
            y.to_owned(),
            ModelKind::Regression,
            Vec::new(),
            Vec::new(),
            x_test,
        )
    }

    fn train(
        &self,
        x_raw: ArrayView2<'_, f64>,
        y_raw: Array2<f64>,
        kind: ModelKind,
        class_values: Vec<u32>,
        class_names: Vec<String>,
        x_test: Option<ArrayView2<'_, f64>>,
    ) -> Result<(CcForest, Option<Array2<f64>>), CcfError> {
        let options = &self.options;
        let logger = TrainingLogger::new(options.verbosity);

        if x_raw.nrows() == 0 || x_raw.ncols() == 0 {
            return Err(CcfError::EmptyTrainingData);
        }
        if y_raw.nrows() != x_raw.nrows() {
            return Err(CcfError::ShapeMismatch {
                x_rows: x_raw.nrows(),
                y_rows: y_raw.nrows(),
            });
        }
        let k = y_raw.ncols();
        let task_boundaries = options.task_boundaries(k);
        if task_boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidTaskBoundaries.into());
        }

        let regression = kind == ModelKind::Regression;
        if !regression && k < 2 {
            logger.info("warning: only one class present in the targets");
        }
        let nan_to_mean = options.missing_values == MissingValues::Mean;
        let (x_proc, details) = ProcessDetails::fit(x_raw, &self.is_ordinal, nan_to_mean);
        let feature_group = details.feature_group.clone();

        // Regression targets are standardized; zero spread maps to 1.
        let (y_enc, target_scaling) = if regression {
            let (mean, std) = nan_safe_moments(y_raw.view());
            let mut y = y_raw.clone();
            for (j, mut col) in y.columns_mut().into_iter().enumerate() {
                col.mapv_inplace(|v| (v - mean[j]) / std[j]);
            }
            (y, Some(TargetScaling { mean, std }))
        } else {
            (y_raw.clone(), None)
        };

        let x_test_proc = x_test.map(|t| details.transform(t));
        let seeds: Vec<u64> = (0..options.n_trees)
            .map(|i| options.seed.wrapping_add(i as u64))
            .collect();

        logger.info(format!(
            "growing {} trees ({} rows, {} columns)",
            options.n_trees,
            x_proc.nrows(),
            x_proc.ncols()
        ));

        let discard_trees = !options.keep_trees && x_test_proc.is_some();
        let (trees, test_sum) = if discard_trees {
            let test = x_test_proc.as_ref().expect("discard mode requires a test matrix");
            let grow_and_vote = |&seed: &u64| -> Result<Array2<f64>, CcfError> {
                let tree = grow_forest_tree(
                    x_proc.view(),
                    y_enc.view(),
                    &feature_group,
                    &task_boundaries,
                    regression,
                    options,
                    seed,
                )?;
                Ok(predict_matrix(&tree, test.view(), k))
            };
            let votes: Vec<Array2<f64>> = if options.use_parallel {
                seeds.par_iter().map(grow_and_vote).collect::<Result<_, _>>()?
            } else {
                seeds.iter().map(grow_and_vote).collect::<Result<_, _>>()?
            };
            let mut sum = Array2::zeros((test.nrows(), k));
            for v in votes {
                sum += &v;
            }
            (Vec::new(), Some(sum))
        } else {
            let grow = |&seed: &u64| {
                grow_forest_tree(
                    x_proc.view(),
                    y_enc.view(),
                    &feature_group,
                    &task_boundaries,
                    regression,
                    options,
                    seed,
                )
            };
            let trees: Vec<Cct> = if options.use_parallel {
                seeds.par_iter().map(grow).collect::<Result<_, _>>()?
            } else {
                let mut trees = Vec::with_capacity(seeds.len());
                for (i, seed) in seeds.iter().enumerate() {
                    trees.push(grow(seed)?);
                    logger.debug(format!("grew tree {}/{}", i + 1, seeds.len()));
                }
                trees
            };

            let test_sum = x_test_proc.as_ref().map(|test| {
                let mut sum = Array2::zeros((test.nrows(), k));
                for tree in &trees {
                    sum += &predict_matrix(tree, test.view(), k);
                }
                sum
            });
            (trees, test_sum)
        };

        // OOB error: only meaningful when bagging is on and the trees were
        // retained.
        let oob_error = if options.bag_trees && !trees.is_empty() {
            let err = compute_oob_error(
                &trees,
                &y_enc,
                &y_raw,
                kind,
                &task_boundaries,
                target_scaling.as_ref(),
                options.separate_task_predictions,
            );
            if let Some(err) = &err {
                logger.info(format!("oob error: {:?}", err));
            }
            err
        } else {
            None
        };

        let n_grown = if discard_trees {
            options.n_trees
        } else {
            trees.len()
        };
        let test_predictions = test_sum.map(|mut sum| {
            sum /= n_grown.max(1) as f64;
            if let Some(scaling) = &target_scaling {
                for (j, mut col) in sum.columns_mut().into_iter().enumerate() {
                    col.mapv_inplace(|v| v * scaling.std[j] + scaling.mean[j]);
                }
            }
            sum
        });

        let forest = CcForest {
            kind,
            options: options.clone(),
            trees,
            details,
            class_names,
            class_values,
            task_boundaries,
            target_scaling,
            oob_error,
        };
        Ok((forest, test_predictions))
    }
}

// ============================================================================
// OOB error
// ============================================================================

fn compute_oob_error(
    trees: &[Cct],
    y_enc: &Array2<f64>,
    y_raw: &Array2<f64>,
    kind: ModelKind,
    task_boundaries: &[usize],
    scaling: Option<&TargetScaling>,
    separate_tasks: bool,
) -> Option<OobError> {
    let n = y_enc.nrows();
    let k = y_enc.ncols();
    let mut sums = Array2::<f64>::zeros((n, k));
    let mut votes = vec![0usize; n];

    for tree in trees {
        let oob = match &tree.oob {
            Some(oob) => oob,
            None => continue,
        };
        for (pos, &row) in oob.rows.iter().enumerate() {
            votes[row as usize] += 1;
            for c in 0..k {
                sums[[row as usize, c]] += oob.predictions[[pos, c]];
            }
        }
    }
    let covered: Vec<usize> = (0..n).filter(|&i| votes[i] > 0).collect();
    if covered.is_empty() {
        return None;
    }

    match kind {
        ModelKind::Classification => {
            let n_tasks = task_boundaries.len() - 1;
            let mut errors = Vec::with_capacity(n_tasks);
            for t in 0..n_tasks {
                let (start, end) = (task_boundaries[t], task_boundaries[t + 1]);
                let wrong = covered
                    .iter()
                    .filter(|&&i| {
                        let pred = argmax_range(sums.row(i), start, end);
                        let truth = argmax_range(y_enc.row(i), start, end);
                        pred != truth
                    })
                    .count();
                errors.push(wrong as f64 / covered.len() as f64);
            }
            if separate_tasks {
                Some(OobError::PerTask(errors))
            } else {
                let mean = errors.iter().sum::<f64>() / errors.len() as f64;
                Some(OobError::Classification(mean))
            }
        }
        ModelKind::Regression => {
            let mut mse = vec![0.0; k];
            for &i in &covered {
                for c in 0..k {
                    let mut pred = sums[[i, c]] / votes[i] as f64;
                    if let Some(scaling) = scaling {
                        pred = pred * scaling.std[c] + scaling.mean[c];
                    }
                    let diff = pred - y_raw[[i, c]];
                    mse[c] += diff * diff;
                }
            }
            for v in mse.iter_mut() {
                *v /= covered.len() as f64;
            }
            Some(OobError::Regression(mse))
        }
    }
}

fn argmax_range(row: ndarray::ArrayView1<'_, f64>, start: usize, end: usize) -> usize {
    let mut best = start;
    for c in start..end {
        if row[c] > row[best] {
            best = c;
        }
    }
    best
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DirectionTieBreak, ProjectionKinds, SplitCriterion};
    use ndarray::array;

    fn deterministic_options() -> CcfOptions {
        CcfOptions {
            n_trees: 1,
            projections: ProjectionKinds::original_only(),
            proj_boot: false,
            dir_if_equal: DirectionTieBreak::First,
            use_parallel: false,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let x = array![[0.0], [1.0]];
        let trainer = CcfTrainer::new(deterministic_options()).unwrap();
        let err = trainer.fit_classification(x.view(), &[0]).unwrap_err();
        assert!(matches!(err, CcfError::ShapeMismatch { .. }));
    }

    #[test]
    fn rejects_empty_training_data() {
        let x = Array2::<f64>::zeros((0, 2));
        let trainer = CcfTrainer::new(deterministic_options()).unwrap();
        let err = trainer.fit_classification(x.view(), &[]).unwrap_err();
        assert!(matches!(err, CcfError::EmptyTrainingData));
    }

    #[test]
    fn single_class_training_yields_constant_predictions() {
        let x = array![[0.0], [1.0], [2.0]];
        let trainer = CcfTrainer::new(deterministic_options()).unwrap();
        let forest = trainer.fit_classification(x.view(), &[7, 7, 7]).unwrap();
        let classes = forest.predict_classes(x.view());
        assert_eq!(classes, vec![7, 7, 7]);
    }

    #[test]
    fn training_data_is_memorized_without_bagging() {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.9],
            [0.9, 0.1],
            [1.0, 1.0],
            [0.2, 0.8],
            [0.8, 0.2]
        ];
        let labels = vec![0, 1, 2, 0, 1, 2];
        let trainer = CcfTrainer::new(deterministic_options()).unwrap();
        let forest = trainer.fit_classification(x.view(), &labels).unwrap();
        assert_eq!(forest.predict_classes(x.view()), labels);
    }

    #[test]
    fn oob_error_absent_without_bagging() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let trainer = CcfTrainer::new(deterministic_options()).unwrap();
        let forest = trainer.fit_classification(x.view(), &[0, 0, 1, 1]).unwrap();
        assert!(forest.oob_error().is_none());
    }

    #[test]
    fn regression_unstandardizes_predictions() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![[10.0], [10.0], [30.0], [30.0]];
        let options = CcfOptions {
            split_criterion: SplitCriterion::Mse,
            ..deterministic_options()
        };
        let trainer = CcfTrainer::new(options).unwrap();
        let forest = trainer.fit_regression(x.view(), y.view()).unwrap();
        let preds = forest.predict(x.view());
        crate::assert_approx_eq!(preds[[0, 0]], 10.0, 1e-9);
        crate::assert_approx_eq!(preds[[3, 0]], 30.0, 1e-9);
    }

    #[test]
    fn constant_regression_target_gives_stump_with_that_mean() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![[4.25], [4.25], [4.25]];
        let options = CcfOptions {
            split_criterion: SplitCriterion::Mse,
            ..deterministic_options()
        };
        let trainer = CcfTrainer::new(options).unwrap();
        let forest = trainer.fit_regression(x.view(), y.view()).unwrap();
        assert!(forest.trees()[0].root.is_leaf());
        let preds = forest.predict(x.view());
        for &p in preds.column(0) {
            assert!((p - 4.25).abs() < 1e-9);
        }
    }

    #[test]
    fn discarded_trees_still_vote_on_test_data() {
        let x = array![[0.0], [0.1], [1.0], [1.1]];
        let labels = vec![0, 0, 1, 1];
        let options = CcfOptions {
            n_trees: 5,
            keep_trees: false,
            ..deterministic_options()
        };
        let trainer = CcfTrainer::new(options).unwrap();
        let (forest, preds) = trainer
            .fit_predict_classification(x.view(), &labels, x.view())
            .unwrap();
        assert_eq!(forest.n_trees(), 0);
        assert!(forest.oob_error().is_none());
        // Mean votes still separate the classes.
        assert!(preds[[0, 0]] > preds[[0, 1]]);
        assert!(preds[[3, 1]] > preds[[3, 0]]);
    }

    #[test]
    fn multitask_labels_argmax_within_each_block() {
        // Two tasks: columns 0..2 and 2..4. Feature separates both tasks.
        let x = array![[0.0], [0.1], [1.0], [1.1]];
        let y = array![
            [1.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 1.0, 0.0],
            [0.0, 1.0, 1.0, 0.0]
        ];
        let options = CcfOptions {
            task_starts: vec![0, 2],
            ..deterministic_options()
        };
        let trainer = CcfTrainer::new(options).unwrap();
        let forest = trainer.fit_multitask(x.view(), y.view()).unwrap();
        let labels = forest.predict_labels(x.view());
        assert_eq!(labels.row(0).to_vec(), vec![0, 3]);
        assert_eq!(labels.row(3).to_vec(), vec![1, 2]);
    }

    #[test]
    fn parallel_and_serial_builds_agree() {
        let x = array![
            [0.0, 0.3],
            [0.1, 0.8],
            [0.9, 0.1],
            [1.0, 0.9],
            [0.3, 0.5],
            [0.7, 0.6],
            [0.2, 0.2],
            [0.8, 0.9]
        ];
        let labels = vec![0, 0, 1, 1, 0, 1, 0, 1];
        let base = CcfOptions {
            n_trees: 8,
            bag_trees: true,
            seed: 1234,
            ..Default::default()
        };

        let serial = CcfTrainer::new(CcfOptions {
            use_parallel: false,
            ..base.clone()
        })
        .unwrap()
        .fit_classification(x.view(), &labels)
        .unwrap();
        let parallel = CcfTrainer::new(CcfOptions {
            use_parallel: true,
            ..base
        })
        .unwrap()
        .fit_classification(x.view(), &labels)
        .unwrap();

        let grid = array![[0.25, 0.25], [0.75, 0.75], [0.1, 0.9]];
        assert_eq!(serial.predict(grid.view()), parallel.predict(grid.view()));
        assert_eq!(serial.oob_error(), parallel.oob_error());
    }
}
