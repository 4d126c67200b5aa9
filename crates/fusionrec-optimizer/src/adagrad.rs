//! Adagrad optimizer.

use serde::{Deserialize, Serialize};

use crate::{Optimizer, OptimizerConfig, OptimizerError};

/// Adagrad: per-coordinate learning rates from an ever-growing accumulator
/// of squared gradients.
///
/// ```text
/// acc += g^2
/// param -= lr * g / sqrt(acc)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adagrad {
    learning_rate: f32,
    initial_accumulator: f32,
    accumulator: Vec<f32>,
    config: OptimizerConfig,
}

impl Optimizer for Adagrad {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        match config {
            OptimizerConfig::Adagrad {
                learning_rate,
                initial_accumulator,
            } => Ok(Self {
                learning_rate,
                initial_accumulator,
                accumulator: Vec::new(),
                config,
            }),
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Adagrad".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]) {
        if self.accumulator.len() != param.len() {
            self.accumulator = vec![self.initial_accumulator; param.len()];
        }
        for (i, (p, g)) in param.iter_mut().zip(gradients.iter()).enumerate() {
            self.accumulator[i] += g * g;
            *p -= self.learning_rate * g / self.accumulator[i].sqrt();
        }
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_shrink_over_time() {
        let config = OptimizerConfig::from_name("adagrad", 0.1).unwrap();
        let mut opt = Adagrad::new(config).unwrap();
        let mut param = vec![0.0];

        opt.apply_gradients(&mut param, &[1.0]);
        let first = -param[0];
        let before = param[0];
        opt.apply_gradients(&mut param, &[1.0]);
        let second = before - param[0];
        assert!(second < first);
    }
}
