//! Error types for the detector pipeline.

use thiserror::Error;

/// Errors raised while loading data, evaluating or training.
#[derive(Error, Debug)]
pub enum DetectorError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in annotations or checkpoint state.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Model configuration could not be loaded.
    #[error("could not load model config: {0}")]
    Config(String),

    /// Model weights could not be saved or restored.
    #[error("recorder error: {0}")]
    Recorder(String),

    /// Invalid hyperparameter or geometry.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong.
        message: String,
    },

    /// Parallel arrays disagree in length.
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Which input disagreed.
        context: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },

    /// A reduction was asked to run over nothing.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// CT volume file does not match its declared shape.
    #[error("invalid volume {path}: {message}")]
    InvalidVolume {
        /// Offending file.
        path: String,
        /// What was wrong.
        message: String,
    },

    /// A split resolved to zero samples.
    #[error("split {0:?} contains no samples")]
    EmptySplit(Vec<usize>),

    /// Requested checkpoint is not on disk.
    #[error("checkpoint for step {0} not found")]
    MissingCheckpoint(u64),
}

/// Result type for detector operations.
pub type Result<T> = std::result::Result<T, DetectorError>;
