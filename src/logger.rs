//! Structured training progress output.

use serde::{Deserialize, Serialize};

/// How much progress output the trainer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    /// No output.
    #[default]
    Silent,
    /// Start/finish summary and OOB error.
    Info,
    /// Per-tree progress.
    Debug,
}

/// Writes training progress to stderr according to a [`Verbosity`] level.
#[derive(Debug, Clone, Copy)]
pub struct TrainingLogger {
    verbosity: Verbosity,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if self.verbosity != Verbosity::Silent {
            eprintln!("[ccforest] {}", msg.as_ref());
        }
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        if self.verbosity == Verbosity::Debug {
            eprintln!("[ccforest] {}", msg.as_ref());
        }
    }
}
