//! Fit-once, transform-many input processing.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::numeric::nan_safe_moments;

/// Everything needed to map a raw input matrix into the numeric, grouped
/// representation the forest was trained on.
///
/// Ordinal columns are standardized with NaN-ignoring moments; categorical
/// columns are expanded into one 0/1 column per observed category, all
/// sharing one feature group so the per-node feature subsample treats the
/// expansion as a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDetails {
    /// Per original column: true if treated as ordinal.
    pub ordinal: Vec<bool>,
    /// Per original column: observed category values (empty for ordinal).
    pub categories: Vec<Vec<f64>>,
    /// Per expanded column: standardization mean (0 for one-hot columns).
    pub means: Vec<f64>,
    /// Per expanded column: standardization std (1 for one-hot columns).
    pub stds: Vec<f64>,
    /// Per expanded column: feature group id.
    pub feature_group: Vec<Option<u32>>,
    /// Whether remaining NaNs were substituted with the column mean at fit
    /// time. When false the trees impute per-tree instead.
    pub nan_to_mean: bool,
}

impl ProcessDetails {
    /// Fit the processing on a training matrix and return the processed
    /// matrix alongside the reusable details.
    ///
    /// `is_ordinal` has one flag per input column; an empty slice treats
    /// every column as ordinal.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        is_ordinal: &[bool],
        nan_to_mean: bool,
    ) -> (Array2<f64>, Self) {
        let d_in = x.ncols();
        let ordinal: Vec<bool> = if is_ordinal.is_empty() {
            vec![true; d_in]
        } else {
            assert_eq!(is_ordinal.len(), d_in, "one ordinal flag per column");
            is_ordinal.to_vec()
        };

        let mut categories: Vec<Vec<f64>> = vec![Vec::new(); d_in];
        for (j, cats) in categories.iter_mut().enumerate() {
            if ordinal[j] {
                continue;
            }
            let mut seen: Vec<f64> =
                x.column(j).iter().copied().filter(|v| !v.is_nan()).collect();
            seen.sort_by(f64::total_cmp);
            seen.dedup();
            *cats = seen;
        }

        // Expanded-column layout: ordinal columns map 1:1, categorical
        // columns contribute one column per category, all in one group.
        let mut feature_group = Vec::new();
        let mut source_column = Vec::new();
        for j in 0..d_in {
            let width = if ordinal[j] { 1 } else { categories[j].len() };
            for _ in 0..width {
                feature_group.push(Some(j as u32));
                source_column.push(j);
            }
        }

        let mut details = Self {
            ordinal,
            categories,
            means: vec![0.0; feature_group.len()],
            stds: vec![1.0; feature_group.len()],
            feature_group,
            nan_to_mean,
        };

        let expanded = details.expand(x);
        let (means, stds) = nan_safe_moments(expanded.view());
        for (c, &j) in source_column.iter().enumerate() {
            if details.ordinal[j] {
                details.means[c] = means[c];
                details.stds[c] = stds[c];
            }
        }

        let out = details.scale(expanded, details.nan_to_mean);
        (out, details)
    }

    /// Apply the fitted processing to another matrix (e.g. test data).
    ///
    /// NaNs are always mean-substituted here: inference has no per-tree
    /// imputation.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let expanded = self.expand(x);
        self.scale(expanded, true)
    }

    /// Number of expanded columns.
    pub fn n_expanded(&self) -> usize {
        self.feature_group.len()
    }

    /// Expand categorical columns into 0/1 indicator blocks.
    fn expand(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        assert_eq!(x.ncols(), self.ordinal.len(), "column count changed");
        let n = x.nrows();
        let mut out = Array2::zeros((n, self.n_expanded()));
        let mut c = 0;
        for j in 0..self.ordinal.len() {
            if self.ordinal[j] {
                out.column_mut(c).assign(&x.column(j));
                c += 1;
            } else {
                for &cat in &self.categories[j] {
                    for (i, &v) in x.column(j).iter().enumerate() {
                        if !v.is_nan() && v == cat {
                            out[[i, c]] = 1.0;
                        }
                    }
                    c += 1;
                }
            }
        }
        out
    }

    /// Standardize in place; optionally substitute remaining NaNs with the
    /// (standardized) column mean of zero.
    fn scale(&self, mut x: Array2<f64>, impute: bool) -> Array2<f64> {
        for (c, mut col) in x.columns_mut().into_iter().enumerate() {
            let mean = self.means[c];
            let std = self.stds[c];
            for v in col.iter_mut() {
                if v.is_nan() {
                    if impute {
                        *v = 0.0;
                    }
                } else {
                    *v = (*v - mean) / std;
                }
            }
        }
        x
    }
}

/// One-hot encode integer class labels.
///
/// Returns the encoding, the sorted distinct label values, and printable
/// class names.
pub fn encode_labels(labels: &[u32]) -> (Array2<f64>, Vec<u32>, Vec<String>) {
    let mut values: Vec<u32> = labels.to_vec();
    values.sort_unstable();
    values.dedup();

    let mut y = Array2::zeros((labels.len(), values.len()));
    for (i, label) in labels.iter().enumerate() {
        let k = values.binary_search(label).expect("label seen during scan");
        y[[i, k]] = 1.0;
    }
    let names = values.iter().map(|v| v.to_string()).collect();
    (y, values, names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn ordinal_columns_are_standardized() {
        let x = array![[1.0], [2.0], [3.0]];
        let (out, details) = ProcessDetails::fit(x.view(), &[], true);
        assert_eq!(details.n_expanded(), 1);
        let mean: f64 = out.column(0).iter().sum::<f64>() / 3.0;
        assert!(mean.abs() < 1e-12);
    }

    #[test]
    fn categorical_columns_expand_into_one_group() {
        let x = array![[0.0, 2.0], [1.0, 1.0], [0.0, 0.0], [1.0, 2.0]];
        let (out, details) = ProcessDetails::fit(x.view(), &[true, false], true);

        // Column 1 has categories {0, 1, 2} -> 3 indicator columns.
        assert_eq!(details.n_expanded(), 4);
        assert_eq!(
            details.feature_group,
            vec![Some(0), Some(1), Some(1), Some(1)]
        );
        assert_eq!(out[[0, 3]], 1.0); // row 0, category 2
        assert_eq!(out[[2, 1]], 1.0); // row 2, category 0
        assert_eq!(out[[2, 3]], 0.0);
    }

    #[test]
    fn transform_matches_fit_representation() {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0]];
        let (fitted, details) = ProcessDetails::fit(x.view(), &[true, false], true);
        let transformed = details.transform(x.view());
        assert_eq!(fitted, transformed);
    }

    #[test]
    fn transform_imputes_missing_with_mean() {
        let x = array![[1.0], [3.0]];
        let (_, details) = ProcessDetails::fit(x.view(), &[], true);
        let test = array![[f64::NAN]];
        let out = details.transform(test.view());
        assert_eq!(out[[0, 0]], 0.0); // standardized mean
    }

    #[test]
    fn nan_preserved_when_trees_impute() {
        let x = array![[1.0], [f64::NAN], [3.0]];
        let (out, _) = ProcessDetails::fit(x.view(), &[], false);
        assert!(out[[1, 0]].is_nan());
    }

    #[test]
    fn label_encoding_is_one_hot() {
        let (y, values, names) = encode_labels(&[3, 1, 3, 2]);
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(names, vec!["1", "2", "3"]);
        assert_eq!(y.row(0).to_vec(), vec![0.0, 0.0, 1.0]);
        assert_eq!(y.row(1).to_vec(), vec![1.0, 0.0, 0.0]);
        assert_eq!(y.row(3).to_vec(), vec![0.0, 1.0, 0.0]);
    }
}
