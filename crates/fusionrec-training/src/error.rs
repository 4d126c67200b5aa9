//! Error types for model construction and training.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the fusion model and the training session.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The configured checkpoint path is not of `dir/subdir/name` shape.
    #[error("checkpoint path {0:?} must contain at least two path separators")]
    InvalidCheckpointPath(String),

    /// `load` found neither a checkpoint file nor a directory containing one.
    #[error("no checkpoint found at {0}")]
    NoCheckpoint(PathBuf),

    /// Metric name is not one of the supported metrics.
    #[error("invalid metric name: {0:?}")]
    UnknownMetric(String),

    /// A restored state does not line up with the constructed model.
    #[error("invalid model state: {0}")]
    InvalidState(String),

    /// The batch does not match the model's configured feature widths.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure inside a layer computation.
    #[error(transparent)]
    Layer(#[from] fusionrec_layers::LayerError),

    /// Optimizer configuration failure.
    #[error(transparent)]
    Optimizer(#[from] fusionrec_optimizer::OptimizerError),

    /// Table assembly failure.
    #[error(transparent)]
    Data(#[from] fusionrec_data::DataError),

    /// Checkpoint IO failure.
    #[error(transparent)]
    Checkpoint(#[from] fusionrec_checkpoint::CheckpointError),

    /// Prediction artifact IO failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Prediction artifact encoding failure.
    #[error("artifact serialization error: {0}")]
    Artifact(#[from] serde_json::Error),
}

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::InvalidCheckpointPath("model.ckpt".to_string());
        assert!(err.to_string().contains("path separators"));

        let err = ModelError::UnknownMetric("f1".to_string());
        assert!(err.to_string().contains("f1"));
    }
}
