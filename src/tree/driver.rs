//! Per-tree driver: imputation, bagging, rotation, growth, OOB capture.

use ndarray::{Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::error::CcfError;
use crate::options::{CcfOptions, MissingValues};
use crate::rotation::{fit_rotation, Rotation};
use crate::tree::grower::grow_tree;
use crate::tree::node::Node;
use crate::tree::predict::predict_matrix;

/// One grown canonical correlation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cct {
    /// Root of the induced tree.
    pub root: Node,
    /// Whole-tree input rotation, replayed at inference.
    pub rotation: Option<Rotation>,
    /// Out-of-bag rows and their predictions. Training-time state only;
    /// not part of the persisted model.
    #[serde(skip)]
    pub oob: Option<OobSample>,
}

/// Out-of-bag rows of one tree with the tree's predictions for them.
#[derive(Debug, Clone)]
pub struct OobSample {
    pub rows: Vec<u32>,
    pub predictions: Array2<f64>,
}

/// Grow one forest tree from its deterministic seed.
///
/// `x` is the processed training matrix; it still contains NaNs when the
/// missing-value policy is [`MissingValues::Random`], in which case each
/// missing entry is substituted here with a draw from the column's
/// empirical distribution, independently per tree.
pub fn grow_forest_tree(
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    feature_group: &[Option<u32>],
    tasks: &[usize],
    regression: bool,
    options: &CcfOptions,
    seed: u64,
) -> Result<Cct, CcfError> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let n = x.nrows();

    let x_tree = match options.missing_values {
        MissingValues::Random => impute_random(x, &mut rng),
        MissingValues::Mean => x.to_owned(),
    };

    let (in_bag, oob_rows) = if options.bag_trees {
        let mut hit = vec![false; n];
        let bag: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        for &r in &bag {
            hit[r] = true;
        }
        let oob: Vec<usize> = (0..n).filter(|&r| !hit[r]).collect();
        (bag, oob)
    } else {
        ((0..n).collect(), Vec::new())
    };

    let x_bag = select_rows(x_tree.view(), &in_bag);
    let y_bag = select_rows(y, &in_bag);

    let rotation = fit_rotation(
        options.tree_rotation,
        x_bag.view(),
        y_bag.view(),
        !regression,
        &options.rotation_forest,
        &mut rng,
    );

    let root = match &rotation {
        Some(rot) => {
            // Rotated columns are mixtures of the original features, so the
            // categorical grouping no longer applies below this point.
            let x_rot = rot.apply(x_bag.view());
            let trivial: Vec<Option<u32>> = (0..x_rot.ncols() as u32).map(Some).collect();
            grow_tree(
                x_rot.view(),
                y_bag.view(),
                &trivial,
                tasks,
                regression,
                options,
                &mut rng,
            )?
        }
        None => grow_tree(
            x_bag.view(),
            y_bag.view(),
            feature_group,
            tasks,
            regression,
            options,
            &mut rng,
        )?,
    };

    let mut tree = Cct {
        root,
        rotation,
        oob: None,
    };

    if options.bag_trees && !oob_rows.is_empty() {
        let x_oob = select_rows(x_tree.view(), &oob_rows);
        let predictions = predict_matrix(&tree, x_oob.view(), y.ncols());
        tree.oob = Some(OobSample {
            rows: oob_rows.iter().map(|&r| r as u32).collect(),
            predictions,
        });
    }

    Ok(tree)
}

fn select_rows(x: ArrayView2<'_, f64>, rows: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), x.ncols()), |(i, j)| x[[rows[i], j]])
}

/// Substitute each NaN with a draw from the column's non-NaN values.
fn impute_random<R: Rng>(x: ArrayView2<'_, f64>, rng: &mut R) -> Array2<f64> {
    let mut out = x.to_owned();
    for mut col in out.columns_mut() {
        let observed: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
        for v in col.iter_mut() {
            if v.is_nan() {
                *v = if observed.is_empty() {
                    0.0
                } else {
                    observed[rng.gen_range(0..observed.len())]
                };
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DirectionTieBreak, ProjectionKinds, TreeRotationKind};
    use ndarray::array;

    fn options() -> CcfOptions {
        CcfOptions {
            projections: ProjectionKinds::original_only(),
            proj_boot: false,
            dir_if_equal: DirectionTieBreak::First,
            ..Default::default()
        }
    }

    fn blob() -> (Array2<f64>, Array2<f64>) {
        let x = array![
            [0.0, 0.2],
            [0.1, 0.1],
            [0.2, 0.0],
            [1.0, 0.8],
            [0.9, 0.9],
            [0.8, 1.0]
        ];
        let y = array![
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [0.0, 1.0],
            [0.0, 1.0],
            [0.0, 1.0]
        ];
        (x, y)
    }

    #[test]
    fn unbagged_tree_has_no_oob() {
        let (x, y) = blob();
        let groups: Vec<Option<u32>> = vec![Some(0), Some(1)];
        let tree = grow_forest_tree(x.view(), y.view(), &groups, &[0, 2], false, &options(), 7).unwrap();
        assert!(tree.oob.is_none());
        assert!(tree.rotation.is_none());
    }

    #[test]
    fn bagged_tree_records_oob_predictions() {
        let (x, y) = blob();
        let groups: Vec<Option<u32>> = vec![Some(0), Some(1)];
        let opts = CcfOptions {
            bag_trees: true,
            ..options()
        };
        // A size-6 bootstrap covers all rows for the odd seed; take the
        // first seed that leaves an OOB set.
        let tree = (0..16)
            .map(|seed| {
                grow_forest_tree(x.view(), y.view(), &groups, &[0, 2], false, &opts, seed).unwrap()
            })
            .find(|tree| tree.oob.is_some())
            .expect("some bootstrap leaves OOB rows");
        let oob = tree.oob.unwrap();
        assert_eq!(oob.predictions.nrows(), oob.rows.len());
        assert_eq!(oob.predictions.ncols(), 2);
        // Votes are one-hot rows.
        for row in oob.predictions.rows() {
            assert_eq!(row.iter().sum::<f64>(), 1.0);
        }
    }

    #[test]
    fn identical_seeds_grow_identical_trees() {
        let (x, y) = blob();
        let groups: Vec<Option<u32>> = vec![Some(0), Some(1)];
        let opts = CcfOptions {
            bag_trees: true,
            ..Default::default()
        };
        let a = grow_forest_tree(x.view(), y.view(), &groups, &[0, 2], false, &opts, 3).unwrap();
        let b = grow_forest_tree(x.view(), y.view(), &groups, &[0, 2], false, &opts, 3).unwrap();
        assert_eq!(format!("{:?}", a.root), format!("{:?}", b.root));
    }

    #[test]
    fn random_imputation_draws_observed_values() {
        let x = array![[1.0], [f64::NAN], [3.0]];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let filled = impute_random(x.view(), &mut rng);
        assert!(filled[[1, 0]] == 1.0 || filled[[1, 0]] == 3.0);
    }

    #[test]
    fn rotated_tree_keeps_its_rotation() {
        let (x, y) = blob();
        let groups: Vec<Option<u32>> = vec![Some(0), Some(1)];
        let opts = CcfOptions {
            tree_rotation: TreeRotationKind::Random,
            ..Default::default()
        };
        let tree = grow_forest_tree(x.view(), y.view(), &groups, &[0, 2], false, &opts, 5).unwrap();
        let rotation = tree.rotation.as_ref().expect("rotation requested");
        assert_eq!(rotation.matrix.nrows(), 2);
        // Inference on the training rows still produces one-hot votes.
        let preds = predict_matrix(&tree, x.view(), 2);
        for row in preds.rows() {
            assert_eq!(row.iter().sum::<f64>(), 1.0);
        }
    }
}
