//! Model-state snapshots and checkpoint IO for fusionrec.
//!
//! A [`ModelState`] is a flat bag of named tensors: every trainable
//! parameter plus the non-trainable buffers (batch-norm moving statistics)
//! a model needs to reproduce its predictions exactly. [`Checkpointer`]
//! implementations persist that state to disk:
//!
//! - [`JsonCheckpointer`]: human-readable, handy for debugging
//! - [`BinaryCheckpointer`]: compact bincode encoding
//!
//! Checkpoint filenames embed the global step, and
//! [`Checkpointer::latest`] resolves the newest checkpoint in a directory.
//!
//! ```no_run
//! use fusionrec_checkpoint::{Checkpointer, JsonCheckpointer, ModelState};
//! use std::path::Path;
//!
//! fn main() -> fusionrec_checkpoint::Result<()> {
//!     let checkpointer = JsonCheckpointer::new();
//!     let state = ModelState::new(100);
//!     checkpointer.save(Path::new("/tmp/run/checkpoint-100.json"), &state)?;
//!     let restored = checkpointer.restore(Path::new("/tmp/run/checkpoint-100.json"))?;
//!     assert_eq!(restored.global_step, 100);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod checkpointer;
pub mod state;

pub use checkpointer::{BinaryCheckpointer, Checkpointer, JsonCheckpointer};
pub use state::{ModelState, TensorState};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// I/O failure at a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No checkpoint at the given path.
    #[error("checkpoint not found: {0}")]
    NotFound(PathBuf),

    /// JSON encoding/decoding failure.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encoding/decoding failure.
    #[error("binary serialization error: {0}")]
    Binary(#[from] bincode::Error),
}

/// Result type alias for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;
