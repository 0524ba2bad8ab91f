//! Error types for the reforge enhancement pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Persisted-state errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt state document {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Pipeline-level errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Backend host unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Backend request failed: {0}")]
    BackendRequestFailed(String),

    #[error("Backend model not found: {0}")]
    BackendModelNotFound(String),

    #[error("Backend does not support streaming generate: {0}")]
    GenerateUnsupported(String),

    #[error("Generation failed for {path:?} on backend '{backend}': {reason}")]
    GenerationFailed {
        path: PathBuf,
        backend: String,
        reason: String,
    },

    #[error("Evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("Merge failed for {path:?}: {reason}")]
    MergeFailed { path: PathBuf, reason: String },

    #[error("Dependency cycle detected: {0} file(s) cannot be ordered")]
    CycleDetected(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("State error: {0}")]
    State(#[from] StateError),
}
