//! End-to-end training scenarios.
//!
//! Focused on behavior and invariants: structural guarantees of grown
//! trees, determinism under seeds, boundary inputs, and learning quality
//! on problems canonical correlation forests are built for.

use approx::assert_abs_diff_eq;
use ccforest::testing::{two_blobs, xor_dataset};
use ccforest::tree::Node;
use ccforest::{
    CcfOptions, CcfTrainer, DirectionTieBreak, MaxDepth, OobError, ProjectionKinds,
    SplitCriterion,
};
use ndarray::array;
use rstest::rstest;

fn deterministic_options() -> CcfOptions {
    CcfOptions {
        n_trees: 1,
        projections: ProjectionKinds::original_only(),
        proj_boot: false,
        bag_trees: false,
        dir_if_equal: DirectionTieBreak::First,
        use_parallel: false,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Scenario: linearly separable two-class data on original axes
// ---------------------------------------------------------------------------

#[test]
fn separable_two_class_problem_builds_one_clean_split() {
    let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
    let labels = vec![0u32, 0, 1, 1];

    let trainer = CcfTrainer::new(deterministic_options()).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();

    // One internal node splitting on column 0, two pure leaves.
    let root = &forest.trees()[0].root;
    match root {
        Node::Branch {
            projection,
            left,
            right,
            ..
        } => {
            assert!(left.is_leaf() && right.is_leaf());
            // The winning direction is the identity axis of column 0.
            assert_eq!(projection.iter().filter(|w| w.abs() > 0.0).count(), 1);
            let mut leaf_purity = Vec::new();
            root.for_each_leaf(&mut |leaf| {
                let counts = leaf.counts();
                leaf_purity.push(counts.iter().filter(|&&c| c > 0.0).count());
            });
            assert_eq!(leaf_purity, vec![1, 1]);
        }
        Node::Leaf { .. } => panic!("expected the root to split"),
    }

    assert_eq!(forest.predict_classes(x.view()), labels);
}

// ---------------------------------------------------------------------------
// Scenario: pure node
// ---------------------------------------------------------------------------

#[test]
fn pure_targets_make_the_root_a_leaf() {
    let x = array![[0.0, 5.0], [1.0, 4.0], [2.0, 3.0], [3.0, 2.0]];
    let labels = vec![1u32, 1, 1, 1];

    let trainer = CcfTrainer::new(deterministic_options()).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();

    let root = &forest.trees()[0].root;
    assert!(root.is_leaf());
    assert_eq!(root.counts(), &[4.0]);
    assert_eq!(forest.predict_classes(x.view()), labels);
}

// ---------------------------------------------------------------------------
// Scenario: two-point bag with projections enabled
// ---------------------------------------------------------------------------

#[test]
fn two_point_bag_splits_perpendicular_to_the_difference() {
    let x = array![[0.0, 1.0], [4.0, 3.0]];
    let labels = vec![0u32, 1];
    let options = CcfOptions {
        n_trees: 1,
        proj_boot: false,
        bag_trees: false,
        use_parallel: false,
        ..Default::default()
    };

    let trainer = CcfTrainer::new(options).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();

    let root = &forest.trees()[0].root;
    match root {
        Node::Branch { left, right, .. } => {
            assert!(left.is_leaf() && right.is_leaf());
            assert_eq!(left.counts(), &[1.0, 0.0]);
            assert_eq!(right.counts(), &[0.0, 1.0]);
        }
        Node::Leaf { .. } => panic!("two-point fallback should split"),
    }
    assert_eq!(forest.predict_classes(x.view()), labels);
}

// ---------------------------------------------------------------------------
// Scenario: constant regression target
// ---------------------------------------------------------------------------

#[test]
fn constant_regression_target_predicts_that_value() {
    let x = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
    let y = array![[2.5], [2.5], [2.5], [2.5], [2.5]];
    let options = CcfOptions {
        split_criterion: SplitCriterion::Mse,
        ..deterministic_options()
    };

    let trainer = CcfTrainer::new(options).unwrap();
    let forest = trainer.fit_regression(x.view(), y.view()).unwrap();

    assert!(forest.trees()[0].root.is_leaf());
    let preds = forest.predict(array![[1.5], [10.0]].view());
    for &p in preds.column(0) {
        assert_abs_diff_eq!(p, 2.5, epsilon = 1e-9);
    }
}

// ---------------------------------------------------------------------------
// Scenario: XOR with bagging and CCA projections
// ---------------------------------------------------------------------------

#[test]
fn xor_with_bagged_cca_trees_has_low_oob_error() {
    let (x, labels) = xor_dataset(200, 42);
    let options = CcfOptions {
        n_trees: 50,
        bag_trees: true,
        projections: ProjectionKinds {
            cca: true,
            ..ProjectionKinds::none()
        },
        seed: 42,
        ..Default::default()
    };

    let trainer = CcfTrainer::new(options).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();

    match forest.oob_error() {
        Some(OobError::Classification(err)) => {
            assert!(*err < 0.15, "OOB error too high: {err}");
        }
        other => panic!("expected a classification OOB error, got {other:?}"),
    }

    // Training accuracy should be essentially perfect.
    let predicted = forest.predict_classes(x.view());
    let wrong = predicted
        .iter()
        .zip(&labels)
        .filter(|(a, b)| a != b)
        .count();
    assert!(wrong as f64 / (labels.len() as f64) < 0.05);
}

// ---------------------------------------------------------------------------
// Split criteria
// ---------------------------------------------------------------------------

#[rstest]
#[case(SplitCriterion::Gini)]
#[case(SplitCriterion::Info)]
fn both_classification_criteria_memorize_separable_data(#[case] criterion: SplitCriterion) {
    let (x, labels) = two_blobs(20, 19);
    let options = CcfOptions {
        split_criterion: criterion,
        ..deterministic_options()
    };
    let trainer = CcfTrainer::new(options).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();
    assert_eq!(forest.predict_classes(x.view()), labels);
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[test]
fn deterministic_configuration_reproduces_the_same_tree() {
    let (x, labels) = two_blobs(30, 7);
    let trainer = CcfTrainer::new(deterministic_options()).unwrap();

    let a = trainer.fit_classification(x.view(), &labels).unwrap();
    let b = trainer.fit_classification(x.view(), &labels).unwrap();

    let bytes_a = ccforest::io::serialize_forest(&a).unwrap();
    let bytes_b = ccforest::io::serialize_forest(&b).unwrap();
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn seeded_serial_and_parallel_forests_are_byte_identical() {
    let (x, labels) = two_blobs(40, 11);
    let base = CcfOptions {
        n_trees: 10,
        bag_trees: true,
        seed: 2024,
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

    assert_eq!(
        ccforest::io::serialize_forest(&serial).unwrap(),
        ccforest::io::serialize_forest(&parallel).unwrap()
    );
}

// ---------------------------------------------------------------------------
// Structural invariants
// ---------------------------------------------------------------------------

#[test]
fn leaf_counts_sum_to_training_rows_without_bagging() {
    let (x, labels) = two_blobs(24, 5);
    let trainer = CcfTrainer::new(deterministic_options()).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();

    let mut total = 0.0;
    forest.trees()[0]
        .root
        .for_each_leaf(&mut |leaf| total += leaf.counts().iter().sum::<f64>());
    assert_eq!(total, 24.0);
}

#[test]
fn training_rows_route_to_leaves_matching_their_labels() {
    // Without bagging and with pure leaves, predictions on the training
    // matrix must agree with the class of maximum training count.
    let (x, labels) = two_blobs(30, 13);
    let trainer = CcfTrainer::new(deterministic_options()).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();
    assert_eq!(forest.predict_classes(x.view()), labels);
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[test]
fn single_row_trains_a_stump() {
    let x = array![[1.0, 2.0]];
    let trainer = CcfTrainer::new(deterministic_options()).unwrap();
    let forest = trainer.fit_classification(x.view(), &[3]).unwrap();
    assert!(forest.trees()[0].root.is_leaf());
    assert_eq!(forest.predict_classes(x.view()), vec![3]);
}

#[test]
fn identical_rows_train_a_stump() {
    let x = array![[2.0, 2.0], [2.0, 2.0], [2.0, 2.0], [2.0, 2.0]];
    let labels = vec![0u32, 1, 0, 1];
    let trainer = CcfTrainer::new(deterministic_options()).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();
    assert!(forest.trees()[0].root.is_leaf());
}

#[test]
fn max_depth_zero_builds_a_stump_ensemble() {
    let (x, labels) = two_blobs(20, 1);
    let options = CcfOptions {
        n_trees: 4,
        max_depth: MaxDepth::Depth(0),
        ..deterministic_options()
    };
    let trainer = CcfTrainer::new(options).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();
    for tree in forest.trees() {
        assert!(tree.root.is_leaf());
    }
}

// ---------------------------------------------------------------------------
// Learning quality beyond the axis-aligned comfort zone
// ---------------------------------------------------------------------------

#[test]
fn cca_forest_generalizes_on_held_out_blobs() {
    let (x, labels) = two_blobs(120, 21);
    let (x_test, test_labels) = two_blobs(60, 22);

    let options = CcfOptions {
        n_trees: 20,
        bag_trees: true,
        seed: 5,
        ..Default::default()
    };
    let trainer = CcfTrainer::new(options).unwrap();
    let forest = trainer.fit_classification(x.view(), &labels).unwrap();

    let predicted = forest.predict_classes(x_test.view());
    let wrong = predicted
        .iter()
        .zip(&test_labels)
        .filter(|(a, b)| a != b)
        .count();
    assert!(
        wrong as f64 / (test_labels.len() as f64) < 0.1,
        "too many held-out errors: {wrong}"
    );
}

#[test]
fn regression_forest_tracks_a_linear_function() {
    // y = 2 x0 - x1, noiseless.
    let n = 80;
    let mut x = ndarray::Array2::zeros((n, 2));
    let mut y = ndarray::Array2::zeros((n, 1));
    for i in 0..n {
        let a = (i % 10) as f64 / 10.0;
        let b = (i / 10) as f64 / 8.0;
        x[[i, 0]] = a;
        x[[i, 1]] = b;
        y[[i, 0]] = 2.0 * a - b;
    }

    let options = CcfOptions {
        n_trees: 20,
        split_criterion: SplitCriterion::Mse,
        bag_trees: true,
        seed: 3,
        use_parallel: false,
        ..Default::default()
    };
    let trainer = CcfTrainer::new(options).unwrap();
    let forest = trainer.fit_regression(x.view(), y.view()).unwrap();

    match forest.oob_error() {
        Some(OobError::Regression(mse)) => {
            assert!(mse[0] < 0.05, "OOB MSE too high: {}", mse[0]);
        }
        other => panic!("expected a regression OOB error, got {other:?}"),
    }

    let preds = forest.predict(x.view());
    let mut sse = 0.0;
    for i in 0..n {
        let diff = preds[[i, 0]] - y[[i, 0]];
        sse += diff * diff;
    }
    assert!(sse / (n as f64) < 0.01);
}
