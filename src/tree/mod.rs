//! Canonical correlation trees: representation, induction, inference.

pub mod driver;
pub mod grower;
pub mod node;
pub mod predict;

pub use driver::{grow_forest_tree, Cct, OobSample};
pub use grower::{grow_tree, PathContext};
pub use node::{LeafOutput, Node};
pub use predict::predict_matrix;
