//! Input processing: categorical expansion, standardization, class encoding.
//!
//! Training and test matrices pass through the same fitted
//! [`ProcessDetails`], so inference sees exactly the representation the
//! forest was grown on. Missing values are represented as `f64::NAN`.

mod process;

pub use process::{encode_labels, ProcessDetails};
