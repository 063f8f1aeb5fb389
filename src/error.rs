//! Error types for museforge

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building networks, loading data, or persisting state
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid hyperparameters or graph construction request.
    ///
    /// Always fatal: raised while building, never mid-training.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tensor shapes that must agree do not
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// A single training example could not be used
    #[error("Bad example {}: {message}", path.display())]
    Data {
        /// Archive that failed to load
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Checkpoint could not be written or read
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Serialization failure (YAML, safetensors)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn data(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Data { path: path.into(), message: message.into() }
    }

    pub(crate) fn shape(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch { expected: expected.to_vec(), actual: actual.to_vec() }
    }
}
