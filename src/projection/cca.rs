//! Canonical correlation analysis via SVD whitening.
//!
//! Both blocks are centered and whitened through their thin SVDs, the
//! cross-product of the whitened bases is SVD'd, and the X-side canonical
//! coefficients are recovered by mapping back through the whitening
//! transform. This is algebraically the same as the textbook QR
//! formulation but degrades gracefully on rank-deficient bags: dependent
//! columns simply receive zero coefficients.

use nalgebra::{DMatrix, SVD};

use crate::numeric::CLASS_MASS_TOL;

/// Center columns in place and return the column means.
fn center(m: &DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows().max(1);
    let mut out = m.clone();
    for j in 0..m.ncols() {
        let mean = m.column(j).sum() / n as f64;
        for i in 0..m.nrows() {
            out[(i, j)] -= mean;
        }
    }
    out
}

/// Thin SVD whitening: returns `(U_r, W, r)` with `Xc * W = U_r`, where
/// `U_r` has orthonormal columns and `r` is the numerical rank.
fn whiten(xc: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>, usize) {
    let (n, d) = xc.shape();
    let svd = SVD::new(xc.clone(), true, true);
    let s = &svd.singular_values;
    let s_max = s.iter().cloned().fold(0.0, f64::max);
    let tol = s_max * f64::EPSILON * n.max(d) as f64;
    let rank = s.iter().filter(|&&v| v > tol).count();
    if rank == 0 {
        return (DMatrix::zeros(n, 0), DMatrix::zeros(d, 0), 0);
    }

    let u = svd.u.as_ref().expect("u requested");
    let v_t = svd.v_t.as_ref().expect("v_t requested");
    let u_r = u.columns(0, rank).into_owned();
    let mut w = v_t.rows(0, rank).transpose().into_owned();
    for j in 0..rank {
        let inv = 1.0 / s[j];
        for i in 0..d {
            w[(i, j)] *= inv;
        }
    }
    (u_r, w, rank)
}

/// X-side canonical coefficient directions between `x` and `y`.
///
/// Returns a `d x p` matrix with `p = min(rank(x), rank(y))`; an empty
/// matrix when either block is constant. Directions are scaled by
/// `sqrt(n - 1)` to match the conventional coefficient normalization, and
/// are not unit length.
pub fn canonical_directions(x: &DMatrix<f64>, y: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    let d = x.ncols();
    let xc = center(x);
    let yc = center(y);

    let (ux, wx, rx) = whiten(&xc);
    let (uy, _, ry) = whiten(&yc);
    let p = rx.min(ry);
    if p == 0 {
        return DMatrix::zeros(d, 0);
    }

    let cross = ux.transpose() * uy;
    let svd = SVD::new(cross, true, false);
    let u = svd.u.expect("u requested");

    let scale = ((n.max(2) - 1) as f64).sqrt();
    let mut coeffs = wx * u.columns(0, p).into_owned();
    coeffs *= scale;
    coeffs
}

/// One CCA per class column with non-negligible mass, each against its own
/// indicator; the X-side directions are concatenated in class order.
pub fn classwise_directions(x: &DMatrix<f64>, y: &DMatrix<f64>) -> DMatrix<f64> {
    let d = x.ncols();
    let mut columns: Vec<DMatrix<f64>> = Vec::new();
    for k in 0..y.ncols() {
        let mass: f64 = y.column(k).iter().map(|v| v.abs()).sum();
        if mass < CLASS_MASS_TOL {
            continue;
        }
        let yk = DMatrix::from_fn(y.nrows(), 1, |i, _| y[(i, k)]);
        let dirs = canonical_directions(x, &yk);
        if dirs.ncols() > 0 {
            columns.push(dirs);
        }
    }

    let total: usize = columns.iter().map(|c| c.ncols()).sum();
    let mut out = DMatrix::zeros(d, total);
    let mut offset = 0;
    for block in &columns {
        out.view_mut((0, offset), (d, block.ncols())).copy_from(block);
        offset += block.ncols();
    }
    out
}
