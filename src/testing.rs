//! Testing utilities for ccforest.
//!
//! Assertion helpers and synthetic dataset generators shared by unit and
//! integration tests.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Default tolerance for floating point comparisons.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// Assert that two f64 values are approximately equal.
///
/// # Panics
///
/// Panics if the absolute difference exceeds tolerance.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let tol: f64 = $tolerance;
        let diff = (left_val - right_val).abs();
        if diff > tol {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`\n right: `{:?}`\n  diff: `{:?}` > tolerance `{:?}`",
                left_val, right_val, diff, tol
            );
        }
    }};
}

/// Two well-separated Gaussian-ish blobs on the plane.
///
/// Returns `(x, labels)` with `n` rows split evenly between the classes.
pub fn two_blobs(n: usize, seed: u64) -> (Array2<f64>, Vec<u32>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut x = Array2::zeros((n, 2));
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let class = (i % 2) as u32;
        let center = if class == 0 { 0.0 } else { 3.0 };
        x[[i, 0]] = center + rng.gen::<f64>();
        x[[i, 1]] = center + rng.gen::<f64>();
        labels.push(class);
    }
    (x, labels)
}

/// The XOR problem: `n` uniform samples in the unit square, labelled
/// `x0 > 0.5 XOR x1 > 0.5`. Not linearly separable on the original axes.
pub fn xor_dataset(n: usize, seed: u64) -> (Array2<f64>, Vec<u32>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut x = Array2::zeros((n, 2));
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let a = rng.gen::<f64>();
        let b = rng.gen::<f64>();
        x[[i, 0]] = a;
        x[[i, 1]] = b;
        labels.push(u32::from((a > 0.5) != (b > 0.5)));
    }
    (x, labels)
}
