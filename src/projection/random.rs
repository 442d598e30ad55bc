//! Random orthogonal directions.

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::StandardNormal;

/// Haar-distributed random orthogonal `d x d` matrix: QR of a standard
/// normal matrix with the sign of each column fixed by the corresponding
/// diagonal entry of R.
pub fn random_orthogonal<R: Rng>(d: usize, rng: &mut R) -> DMatrix<f64> {
    let gaussian = DMatrix::from_fn(d, d, |_, _| rng.sample::<f64, _>(StandardNormal));
    let qr = gaussian.qr();
    let r = qr.r();
    let mut q = qr.q();
    for j in 0..d {
        if r[(j, j)] < 0.0 {
            for i in 0..d {
                q[(i, j)] = -q[(i, j)];
            }
        }
    }
    q
}
