//! Per-tree inference.

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::tree::driver::Cct;
use crate::tree::node::{LeafOutput, Node};

/// Route every row of `x` through the tree and collect the leaf outputs
/// as an `n x k` matrix: a one-hot class vote per row for classification,
/// the stored mean vector for regression.
///
/// The tree's rotation, if any, is applied first.
pub fn predict_matrix(tree: &Cct, x: ArrayView2<'_, f64>, k: usize) -> Array2<f64> {
    match &tree.rotation {
        Some(rotation) => {
            let rotated = rotation.apply(x);
            predict_unrotated(&tree.root, rotated.view(), k)
        }
        None => predict_unrotated(&tree.root, x, k),
    }
}

fn predict_unrotated(root: &Node, x: ArrayView2<'_, f64>, k: usize) -> Array2<f64> {
    let mut out = Array2::zeros((x.nrows(), k));
    for (i, row) in x.rows().into_iter().enumerate() {
        match leaf_for(root, row) {
            LeafOutput::Classes(labels) => {
                for &c in labels {
                    out[[i, c as usize]] = 1.0;
                }
            }
            LeafOutput::Mean(means) => {
                for (j, &m) in means.iter().enumerate() {
                    out[[i, j]] = m;
                }
            }
        }
    }
    out
}

/// Walk one row down to its leaf output.
fn leaf_for<'t>(mut node: &'t Node, row: ArrayView1<'_, f64>) -> &'t LeafOutput {
    loop {
        match node {
            Node::Leaf { output, .. } => return output,
            Node::Branch {
                in_cols,
                projection,
                partition,
                left,
                right,
                ..
            } => {
                let score: f64 = in_cols
                    .iter()
                    .zip(projection)
                    .map(|(&c, w)| w * row[c as usize])
                    .sum();
                node = if score <= *partition { left } else { right };
            }
        }
    }
}
