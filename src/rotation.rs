//! Whole-tree input rotations.
//!
//! A rotation is fit on the bagged rows before induction and replayed on
//! every matrix the tree sees afterwards (OOB rows, test data). Three
//! schemes: a Haar-random orthogonal matrix, plain PCA, and
//! Rotation-Forest block PCA (columns are partitioned into blocks, each
//! block's PCA is fit on a class-subsampled bootstrap, and the per-block
//! components are assembled block-diagonally).

use ndarray::{Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::options::{RotationForestParams, TreeRotationKind};
use crate::projection::{components_and_mean, from_dmatrix, random_orthogonal, to_dmatrix};

/// A fitted rotation: `x -> (x - mean) * matrix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rotation {
    /// `d x d'` rotation matrix (`d'` can be below `d` on rank-deficient
    /// bags).
    pub matrix: Array2<f64>,
    /// Column means of the fitting bag.
    pub mean: Vec<f64>,
}

impl Rotation {
    /// Center and rotate a matrix.
    pub fn apply(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut centered = x.to_owned();
        for (j, &mu) in self.mean.iter().enumerate() {
            centered.column_mut(j).mapv_inplace(|v| v - mu);
        }
        centered.dot(&self.matrix)
    }
}

/// Fit a rotation of the requested kind on the bagged rows.
///
/// Returns `None` for [`TreeRotationKind::None`] and for bags too
/// degenerate to produce any rotated column.
pub fn fit_rotation<R: Rng>(
    kind: TreeRotationKind,
    x_bag: ArrayView2<'_, f64>,
    y_bag: ArrayView2<'_, f64>,
    is_classification: bool,
    params: &RotationForestParams,
    rng: &mut R,
) -> Option<Rotation> {
    let d = x_bag.ncols();
    match kind {
        TreeRotationKind::None => None,
        TreeRotationKind::Random => {
            let q = random_orthogonal(d, rng);
            Some(Rotation {
                matrix: from_dmatrix(&q),
                mean: column_means(x_bag),
            })
        }
        TreeRotationKind::Pca => {
            let (components, mean) = components_and_mean(&to_dmatrix(x_bag));
            if components.ncols() == 0 {
                return None;
            }
            Some(Rotation {
                matrix: from_dmatrix(&components),
                mean,
            })
        }
        TreeRotationKind::RotationForest => {
            rotation_forest(x_bag, y_bag, is_classification, params, rng)
        }
    }
}

fn column_means(x: ArrayView2<'_, f64>) -> Vec<f64> {
    let n = x.nrows().max(1) as f64;
    x.columns().into_iter().map(|c| c.sum() / n).collect()
}

/// Class index per row from the one-hot encoding.
fn row_classes(y: ArrayView2<'_, f64>) -> Vec<usize> {
    y.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(k, _)| k)
                .unwrap_or(0)
        })
        .collect()
}

fn rotation_forest<R: Rng>(
    x_bag: ArrayView2<'_, f64>,
    y_bag: ArrayView2<'_, f64>,
    is_classification: bool,
    params: &RotationForestParams,
    rng: &mut R,
) -> Option<Rotation> {
    let n = x_bag.nrows();
    let d = x_bag.ncols();
    let n_blocks = params.groups.min(d).max(1);

    // Random partition of the columns into contiguous chunks of a shuffled
    // order.
    let mut order: Vec<usize> = (0..d).collect();
    for i in (1..d).rev() {
        let j = rng.gen_range(0..=i);
        order.swap(i, j);
    }
    let block_len = d.div_ceil(n_blocks);
    let classes = if is_classification {
        row_classes(y_bag)
    } else {
        vec![0; n]
    };
    let n_classes = classes.iter().copied().max().unwrap_or(0) + 1;

    let mut blocks: Vec<(Vec<usize>, Array2<f64>)> = Vec::new();
    for block_cols in order.chunks(block_len) {
        // Leave each class out of this block's PCA bag independently, but
        // keep at least one class.
        let mut kept: Vec<bool> = (0..n_classes)
            .map(|_| !(is_classification && rng.gen::<f64>() < params.class_leave_out_fraction))
            .collect();
        if kept.iter().all(|&k| !k) {
            kept[rng.gen_range(0..n_classes)] = true;
        }
        let pool: Vec<usize> = (0..n).filter(|&i| kept[classes[i]]).collect();
        if pool.is_empty() {
            continue;
        }

        // Bootstrap a fraction of the pooled rows.
        let sample_size = ((pool.len() as f64 * params.row_keep_fraction).ceil() as usize).max(1);
        let rows: Vec<usize> = (0..sample_size)
            .map(|_| pool[rng.gen_range(0..pool.len())])
            .collect();

        let sub = Array2::from_shape_fn((rows.len(), block_cols.len()), |(i, j)| {
            x_bag[[rows[i], block_cols[j]]]
        });
        let (components, _) = components_and_mean(&to_dmatrix(sub.view()));
        if components.ncols() > 0 {
            blocks.push((block_cols.to_vec(), from_dmatrix(&components)));
        }
    }

    let total_cols: usize = blocks.iter().map(|(_, c)| c.ncols()).sum();
    if total_cols == 0 {
        return None;
    }

    let mut matrix = Array2::zeros((d, total_cols));
    let mut offset = 0;
    for (cols, components) in &blocks {
        for (i, &col) in cols.iter().enumerate() {
            for j in 0..components.ncols() {
                matrix[[col, offset + j]] = components[[i, j]];
            }
        }
        offset += components.ncols();
    }

    Some(Rotation {
        matrix,
        mean: column_means(x_bag),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn bag() -> (Array2<f64>, Array2<f64>) {
        let x = array![
            [0.0, 1.0, 2.0, 0.5],
            [1.0, 0.5, 1.0, 1.5],
            [2.0, 0.0, 0.0, 2.5],
            [3.0, 1.5, 3.0, 0.0],
            [4.0, 2.0, 1.5, 1.0],
            [5.0, 2.5, 2.5, 3.0]
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
    fn none_kind_fits_nothing() {
        let (x, y) = bag();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let rotation = fit_rotation(
            TreeRotationKind::None,
            x.view(),
            y.view(),
            true,
            &RotationForestParams::default(),
            &mut rng,
        );
        assert!(rotation.is_none());
    }

    #[test]
    fn random_rotation_preserves_distances() {
        let (x, y) = bag();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let rotation = fit_rotation(
            TreeRotationKind::Random,
            x.view(),
            y.view(),
            true,
            &RotationForestParams::default(),
            &mut rng,
        )
        .unwrap();
        let rotated = rotation.apply(x.view());

        let dist = |m: &Array2<f64>, a: usize, b: usize| -> f64 {
            (0..m.ncols())
                .map(|j| (m[[a, j]] - m[[b, j]]).powi(2))
                .sum::<f64>()
                .sqrt()
        };
        let original = dist(&x, 0, 5);
        let after = dist(&rotated, 0, 5);
        assert!((original - after).abs() < 1e-9);
    }

    #[test]
    fn pca_rotation_centers_on_bag_mean() {
        let (x, y) = bag();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let rotation = fit_rotation(
            TreeRotationKind::Pca,
            x.view(),
            y.view(),
            true,
            &RotationForestParams::default(),
            &mut rng,
        )
        .unwrap();
        let rotated = rotation.apply(x.view());
        // Columns of the rotated bag are centered.
        for col in rotated.columns() {
            assert!(col.sum().abs() / (rotated.nrows() as f64) < 1e-9);
        }
    }

    #[test]
    fn rotation_forest_produces_block_diagonal_rotation() {
        let (x, y) = bag();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        let rotation = fit_rotation(
            TreeRotationKind::RotationForest,
            x.view(),
            y.view(),
            true,
            &RotationForestParams {
                groups: 2,
                ..Default::default()
            },
            &mut rng,
        )
        .unwrap();
        assert_eq!(rotation.matrix.nrows(), 4);
        assert!(rotation.matrix.ncols() > 0);
        assert!(rotation.matrix.iter().all(|v| v.is_finite()));
        // Block structure: every output column touches only one block of
        // input columns, so each column has at most block-size non-zeros.
        for col in rotation.matrix.columns() {
            let nonzero = col.iter().filter(|v| v.abs() > 0.0).count();
            assert!(nonzero <= 2);
        }
    }
}
