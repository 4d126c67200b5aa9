//! Checkpointer trait and the JSON/binary implementations.

use std::path::{Path, PathBuf};

use crate::state::ModelState;
use crate::{CheckpointError, Result};

/// Persists and restores [`ModelState`] snapshots.
///
/// # Examples
///
/// ```no_run
/// use fusionrec_checkpoint::{Checkpointer, JsonCheckpointer, ModelState};
/// use std::path::Path;
///
/// fn main() -> fusionrec_checkpoint::Result<()> {
///     let checkpointer = JsonCheckpointer::new();
///     let state = ModelState::new(1000);
///     checkpointer.save(Path::new("/tmp/run/checkpoint-1000.json"), &state)?;
///     let restored = checkpointer.restore(Path::new("/tmp/run/checkpoint-1000.json"))?;
///     assert_eq!(restored.global_step, 1000);
///     Ok(())
/// }
/// ```
pub trait Checkpointer: Send + Sync {
    /// Saves model state to the given path, creating parent directories.
    fn save(&self, path: &Path, state: &ModelState) -> Result<()>;

    /// Restores model state from the given path.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::NotFound`] if nothing exists at `path`.
    fn restore(&self, path: &Path) -> Result<ModelState>;

    /// Resolves the checkpoint with the highest embedded step in `dir`.
    ///
    /// Returns `None` when the directory does not exist or holds no
    /// checkpoint this implementation recognizes.
    fn latest(&self, dir: &Path) -> Option<PathBuf>;
}

/// Filename for a checkpoint at the given step.
pub(crate) fn checkpoint_filename(step: u64, extension: &str) -> String {
    format!("checkpoint-{step}.{extension}")
}

fn parse_step(filename: &str, extension: &str) -> Option<u64> {
    filename
        .strip_prefix("checkpoint-")?
        .strip_suffix(extension)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

fn latest_with_extension(dir: &Path, extension: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        if let Some(step) = parse_step(name, extension) {
            if best.as_ref().map_or(true, |(s, _)| step > *s) {
                best = Some((step, path));
            }
        }
    }
    best.map(|(_, path)| path)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

/// Human-readable JSON checkpoints.
#[derive(Debug, Clone, Default)]
pub struct JsonCheckpointer {
    /// Whether to pretty-print the output.
    pub pretty: bool,
}

impl JsonCheckpointer {
    /// File extension used by this checkpointer.
    pub const EXTENSION: &'static str = "json";

    /// Creates a compact JSON checkpointer.
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Creates a pretty-printing JSON checkpointer.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Filename for a checkpoint at the given step.
    pub fn filename(step: u64) -> String {
        checkpoint_filename(step, Self::EXTENSION)
    }
}

impl Checkpointer for JsonCheckpointer {
    fn save(&self, path: &Path, state: &ModelState) -> Result<()> {
        tracing::info!(path = %path.display(), step = state.global_step, "saving checkpoint");
        ensure_parent(path)?;
        let json = if self.pretty {
            serde_json::to_string_pretty(state)?
        } else {
            serde_json::to_string(state)?
        };
        std::fs::write(path, json).map_err(|e| CheckpointError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn restore(&self, path: &Path) -> Result<ModelState> {
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path).map_err(|e| CheckpointError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let state: ModelState = serde_json::from_str(&json)?;
        tracing::info!(
            path = %path.display(),
            step = state.global_step,
            tensors = state.tensor_count(),
            "checkpoint restored"
        );
        Ok(state)
    }

    fn latest(&self, dir: &Path) -> Option<PathBuf> {
        latest_with_extension(dir, Self::EXTENSION)
    }
}

/// Compact bincode checkpoints.
#[derive(Debug, Clone, Default)]
pub struct BinaryCheckpointer;

impl BinaryCheckpointer {
    /// File extension used by this checkpointer.
    pub const EXTENSION: &'static str = "bin";

    /// Creates a binary checkpointer.
    pub fn new() -> Self {
        Self
    }

    /// Filename for a checkpoint at the given step.
    pub fn filename(step: u64) -> String {
        checkpoint_filename(step, Self::EXTENSION)
    }
}

impl Checkpointer for BinaryCheckpointer {
    fn save(&self, path: &Path, state: &ModelState) -> Result<()> {
        tracing::info!(path = %path.display(), step = state.global_step, "saving binary checkpoint");
        ensure_parent(path)?;
        let data = bincode::serialize(state)?;
        std::fs::write(path, data).map_err(|e| CheckpointError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn restore(&self, path: &Path) -> Result<ModelState> {
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        let data = std::fs::read(path).map_err(|e| CheckpointError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let state: ModelState = bincode::deserialize(&data)?;
        Ok(state)
    }

    fn latest(&self, dir: &Path) -> Option<PathBuf> {
        latest_with_extension(dir, Self::EXTENSION)
    }
}
