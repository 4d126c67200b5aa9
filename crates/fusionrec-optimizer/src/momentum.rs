//! Heavy-ball momentum optimizer.

use serde::{Deserialize, Serialize};

use crate::{Optimizer, OptimizerConfig, OptimizerError};

/// Momentum SGD:
///
/// ```text
/// vel = momentum * vel + g
/// param -= lr * vel
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Momentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<f32>,
    config: OptimizerConfig,
}

impl Optimizer for Momentum {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        match config {
            OptimizerConfig::Momentum {
                learning_rate,
                momentum,
            } => Ok(Self {
                learning_rate,
                momentum,
                velocity: Vec::new(),
                config,
            }),
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Momentum".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]) {
        if self.velocity.len() != param.len() {
            self.velocity = vec![0.0; param.len()];
        }
        for (i, (p, g)) in param.iter_mut().zip(gradients.iter()).enumerate() {
            self.velocity[i] = self.momentum * self.velocity[i] + g;
            *p -= self.learning_rate * self.velocity[i];
        }
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}
