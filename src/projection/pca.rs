//! Principal components without the ceremony.

use nalgebra::{DMatrix, SVD};

/// Principal directions of the centered bag: the right singular vectors
/// with singular value above the numerical-rank tolerance, as a `d x r`
/// matrix with orthonormal columns.
pub fn principal_components(x: &DMatrix<f64>) -> DMatrix<f64> {
    let (n, d) = x.shape();
    let mut xc = x.clone();
    for j in 0..d {
        let mean = x.column(j).sum() / n.max(1) as f64;
        for i in 0..n {
            xc[(i, j)] -= mean;
        }
    }

    let svd = SVD::new(xc, false, true);
    let s = &svd.singular_values;
    let s_max = s.iter().cloned().fold(0.0, f64::max);
    let tol = s_max * f64::EPSILON * n.max(d) as f64;
    let rank = s.iter().filter(|&&v| v > tol).count();
    if rank == 0 {
        return DMatrix::zeros(d, 0);
    }

    let v_t = svd.v_t.expect("v_t requested");
    v_t.rows(0, rank).transpose().into_owned()
}

/// Components plus the column means, for callers that need to center new
/// data the same way (tree rotations).
pub fn components_and_mean(x: &DMatrix<f64>) -> (DMatrix<f64>, Vec<f64>) {
    let n = x.nrows().max(1);
    let mean: Vec<f64> = (0..x.ncols())
        .map(|j| x.column(j).sum() / n as f64)
        .collect();
    (principal_components(x), mean)
}
