//! Error types for layer operations.

use thiserror::Error;

/// Error type for layer operations.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Shape mismatch between expected and actual tensor shapes.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The expected shape
        expected: Vec<usize>,
        /// The shape that was provided
        actual: Vec<usize>,
    },

    /// Invalid input feature dimension for the layer.
    #[error("invalid input dimension: expected {expected}, got {actual}")]
    InvalidInputDimension {
        /// The expected input dimension
        expected: usize,
        /// The actual input dimension
        actual: usize,
    },

    /// Index into an embedding table is out of range.
    #[error("embedding index {index} out of range for table with {rows} rows")]
    IndexOutOfRange {
        /// The offending index
        index: usize,
        /// Number of rows in the table
        rows: usize,
    },

    /// Backward called without a cached forward pass.
    #[error("layer not initialized: a training-mode forward pass must run before backward")]
    NotInitialized,

    /// Invalid layer configuration.
    #[error("configuration error: {message}")]
    ConfigError {
        /// Description of the configuration error
        message: String,
    },

    /// Error during forward pass computation.
    #[error("forward pass error: {message}")]
    ForwardError {
        /// Description of the forward pass error
        message: String,
    },
}

/// Result type alias for layer operations.
pub type LayerResult<T> = Result<T, LayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LayerError::ShapeMismatch {
            expected: vec![32, 64],
            actual: vec![32, 128],
        };
        assert!(err.to_string().contains("shape mismatch"));

        let err = LayerError::IndexOutOfRange { index: 9, rows: 4 };
        assert!(err.to_string().contains("out of range"));
    }
}
