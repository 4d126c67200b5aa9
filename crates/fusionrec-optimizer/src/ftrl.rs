//! FTRL-Proximal optimizer.

use serde::{Deserialize, Serialize};

use crate::{Optimizer, OptimizerConfig, OptimizerError};

/// Follow The Regularized Leader (proximal variant), the classic sparse
/// CTR optimizer. L1 shrinkage produces exact zeros; L2 smooths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ftrl {
    learning_rate: f32,
    learning_rate_power: f32,
    l1_reg: f32,
    l2_reg: f32,
    /// Squared-gradient accumulator (n in the paper).
    n: Vec<f32>,
    /// Shifted weight accumulator (z in the paper).
    z: Vec<f32>,
    config: OptimizerConfig,
}

impl Optimizer for Ftrl {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        match config {
            OptimizerConfig::Ftrl {
                learning_rate,
                learning_rate_power,
                l1_reg,
                l2_reg,
            } => Ok(Self {
                learning_rate,
                learning_rate_power,
                l1_reg,
                l2_reg,
                n: Vec::new(),
                z: Vec::new(),
                config,
            }),
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Ftrl".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]) {
        if self.n.len() != param.len() {
            self.n = vec![0.0; param.len()];
            self.z = vec![0.0; param.len()];
        }
        let power = -self.learning_rate_power;
        for (i, (p, g)) in param.iter_mut().zip(gradients.iter()).enumerate() {
            let n_new = self.n[i] + g * g;
            let sigma = (n_new.powf(power) - self.n[i].powf(power)) / self.learning_rate;
            self.z[i] += g - sigma * *p;
            self.n[i] = n_new;

            if self.z[i].abs() <= self.l1_reg {
                *p = 0.0;
            } else {
                let sign = if self.z[i] < 0.0 { -1.0 } else { 1.0 };
                *p = -(self.z[i] - sign * self.l1_reg)
                    / (n_new.powf(power) / self.learning_rate + 2.0 * self.l2_reg);
            }
        }
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ftrl(l1: f32) -> Ftrl {
        Ftrl::new(OptimizerConfig::Ftrl {
            learning_rate: 0.1,
            learning_rate_power: -0.5,
            l1_reg: l1,
            l2_reg: 0.0,
        })
        .unwrap()
    }

    #[test]
    fn test_descends_without_regularization() {
        let mut opt = ftrl(0.0);
        let mut param = vec![0.0];
        opt.apply_gradients(&mut param, &[1.0]);
        assert!(param[0] < 0.0);
    }

    #[test]
    fn test_l1_produces_exact_zero() {
        let mut opt = ftrl(10.0);
        let mut param = vec![0.5];
        opt.apply_gradients(&mut param, &[0.01]);
        assert_eq!(param[0], 0.0);
    }
}
