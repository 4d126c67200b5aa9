//! Snapshot of everything a model needs to reproduce its predictions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A named tensor snapshot: shape plus row-major data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorState {
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<f32>,
}

/// Complete model state for checkpointing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    /// Checkpoint format version.
    pub version: u32,
    /// Global training step at snapshot time.
    pub global_step: u64,
    /// Trainable parameters by name.
    pub params: HashMap<String, TensorState>,
    /// Non-trainable buffers (e.g. moving statistics) by name.
    pub buffers: HashMap<String, TensorState>,
    /// Free-form metadata.
    pub metadata: HashMap<String, String>,
}

impl ModelState {
    /// Current format version.
    pub const VERSION: u32 = 1;

    /// Creates an empty state at the given step.
    pub fn new(global_step: u64) -> Self {
        Self {
            version: Self::VERSION,
            global_step,
            params: HashMap::new(),
            buffers: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Records a parameter snapshot.
    pub fn insert_param(&mut self, name: impl Into<String>, shape: &[usize], data: Vec<f32>) {
        self.params.insert(
            name.into(),
            TensorState {
                shape: shape.to_vec(),
                data,
            },
        );
    }

    /// Records a buffer snapshot.
    pub fn insert_buffer(&mut self, name: impl Into<String>, shape: &[usize], data: Vec<f32>) {
        self.buffers.insert(
            name.into(),
            TensorState {
                shape: shape.to_vec(),
                data,
            },
        );
    }

    /// Looks up a parameter snapshot.
    pub fn param(&self, name: &str) -> Option<&TensorState> {
        self.params.get(name)
    }

    /// Looks up a buffer snapshot.
    pub fn buffer(&self, name: &str) -> Option<&TensorState> {
        self.buffers.get(name)
    }

    /// Total number of stored tensors.
    pub fn tensor_count(&self) -> usize {
        self.params.len() + self.buffers.len()
    }
}
