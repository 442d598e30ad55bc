//! Node-level projection providers.
//!
//! For a node's bag `(X, Y)` and the set of enabled projection kinds, the
//! fitter returns a `d x p` matrix whose columns are candidate split
//! directions. PCA and random directions are orthonormal; CCA directions
//! are not normalized but must be finite. The provider may return fewer
//! columns than requested when the bag is rank deficient.
//!
//! The linear algebra lives on `nalgebra` types; conversion from the
//! `ndarray` data plane happens at this module's boundary.

mod cca;
mod pca;
mod random;

pub use cca::{canonical_directions, classwise_directions};
pub use pca::{components_and_mean, principal_components};
pub use random::random_orthogonal;

use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::options::{IncludeOriginalAxes, ProjectionKinds};

/// Copy an ndarray view into a nalgebra matrix.
pub(crate) fn to_dmatrix(x: ArrayView2<'_, f64>) -> DMatrix<f64> {
    DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[[i, j]])
}

/// Copy a nalgebra matrix back into the ndarray data plane.
pub(crate) fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Fit candidate split directions for a node bag.
///
/// Kinds are emitted in a fixed order (CCA, PCA, class-wise CCA, original,
/// random) so that a seeded build is reproducible.
pub fn fit_projections<R: Rng>(
    x_bag: ArrayView2<'_, f64>,
    y_bag: ArrayView2<'_, f64>,
    kinds: &ProjectionKinds,
    rng: &mut R,
) -> Array2<f64> {
    let d = x_bag.ncols();
    let xm = to_dmatrix(x_bag);
    let ym = to_dmatrix(y_bag);

    let mut blocks: Vec<DMatrix<f64>> = Vec::new();
    if kinds.cca {
        blocks.push(canonical_directions(&xm, &ym));
    }
    if kinds.pca {
        blocks.push(principal_components(&xm));
    }
    if kinds.cca_classwise {
        blocks.push(classwise_directions(&xm, &ym));
    }
    if kinds.original {
        blocks.push(DMatrix::identity(d, d));
    }
    if kinds.random {
        blocks.push(random_orthogonal(d, rng));
    }

    let p: usize = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = Array2::zeros((d, p));
    let mut offset = 0;
    for block in &blocks {
        for j in 0..block.ncols() {
            for i in 0..d {
                out[[i, offset + j]] = block[(i, j)];
            }
        }
        offset += block.ncols();
    }
    out
}

/// Compose a fitted projection matrix with the original-axes policy.
///
/// Returns the node's effective input columns and the projection matrix
/// over them. In the `All` case the matrix is expanded back into the space
/// of every still-active feature column, so the node may split on any
/// original axis that survived the subtree's resampling invalidations.
pub fn compose_with_original_axes(
    p: Array2<f64>,
    in_cols: &[u32],
    mode: IncludeOriginalAxes,
    active_cols: &[u32],
) -> (Vec<u32>, Array2<f64>) {
    match mode {
        IncludeOriginalAxes::No => (in_cols.to_vec(), p),
        IncludeOriginalAxes::Sampled => {
            let d = in_cols.len();
            let k = p.ncols();
            let mut out = Array2::zeros((d, k + d));
            out.slice_mut(ndarray::s![.., ..k]).assign(&p);
            for i in 0..d {
                out[[i, k + i]] = 1.0;
            }
            (in_cols.to_vec(), out)
        }
        IncludeOriginalAxes::All => {
            let d = active_cols.len();
            let k = p.ncols();
            let mut out = Array2::zeros((d, k + d));
            for (row, &col) in in_cols.iter().enumerate() {
                let pos = active_cols
                    .iter()
                    .position(|&c| c == col)
                    .expect("sampled column is active");
                for j in 0..k {
                    out[[pos, j]] = p[[row, j]];
                }
            }
            for i in 0..d {
                out[[i, k + i]] = 1.0;
            }
            (active_cols.to_vec(), out)
        }
    }
}
