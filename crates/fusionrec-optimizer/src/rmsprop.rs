//! RMSprop optimizer.

use serde::{Deserialize, Serialize};

use crate::{Optimizer, OptimizerConfig, OptimizerError};

/// RMSprop with an optional momentum term:
///
/// ```text
/// ms = decay * ms + (1 - decay) * g^2
/// mom = momentum * mom + lr * g / sqrt(ms + epsilon)
/// param -= mom
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rmsprop {
    learning_rate: f32,
    decay: f32,
    momentum: f32,
    epsilon: f32,
    mean_square: Vec<f32>,
    mom: Vec<f32>,
    config: OptimizerConfig,
}

impl Optimizer for Rmsprop {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        match config {
            OptimizerConfig::Rmsprop {
                learning_rate,
                decay,
                momentum,
                epsilon,
            } => Ok(Self {
                learning_rate,
                decay,
                momentum,
                epsilon,
                mean_square: Vec::new(),
                mom: Vec::new(),
                config,
            }),
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Rmsprop".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]) {
        if self.mean_square.len() != param.len() {
            self.mean_square = vec![0.0; param.len()];
            self.mom = vec![0.0; param.len()];
        }
        for (i, (p, g)) in param.iter_mut().zip(gradients.iter()).enumerate() {
            self.mean_square[i] = self.decay * self.mean_square[i] + (1.0 - self.decay) * g * g;
            self.mom[i] = self.momentum * self.mom[i]
                + self.learning_rate * g / (self.mean_square[i] + self.epsilon).sqrt();
            *p -= self.mom[i];
        }
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}
