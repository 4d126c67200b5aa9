//! Stochastic gradient descent.

use serde::{Deserialize, Serialize};

use crate::{Optimizer, OptimizerConfig, OptimizerError};

/// Plain SGD: `param -= learning_rate * gradient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sgd {
    learning_rate: f32,
    config: OptimizerConfig,
}

impl Optimizer for Sgd {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        match config {
            OptimizerConfig::Sgd { learning_rate } => Ok(Self {
                learning_rate,
                config,
            }),
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Sgd".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]) {
        for (p, g) in param.iter_mut().zip(gradients.iter()) {
            *p -= self.learning_rate * g;
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
    fn test_step_direction() {
        let mut sgd = Sgd::new(OptimizerConfig::Sgd { learning_rate: 0.1 }).unwrap();
        let mut param = vec![1.0, -1.0];
        sgd.apply_gradients(&mut param, &[1.0, -1.0]);
        assert!((param[0] - 0.9).abs() < 1e-6);
        assert!((param[1] + 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_config_mismatch() {
        let config = OptimizerConfig::from_name("adam", 0.01).unwrap();
        assert!(Sgd::new(config).is_err());
    }
}
