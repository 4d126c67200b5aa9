//! Adam optimizer.

use serde::{Deserialize, Serialize};

use crate::{Optimizer, OptimizerConfig, OptimizerError};

/// Adam with bias-corrected first and second moment estimates:
///
/// ```text
/// m = beta1 * m + (1 - beta1) * g
/// v = beta2 * v + (1 - beta2) * g^2
/// param -= lr * (m / (1 - beta1^t)) / (sqrt(v / (1 - beta2^t)) + epsilon)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: Vec<f32>,
    v: Vec<f32>,
    t: u64,
    config: OptimizerConfig,
}

impl Adam {
    /// Current timestep.
    pub fn timestep(&self) -> u64 {
        self.t
    }
}

impl Optimizer for Adam {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        match config {
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Ok(Self {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                m: Vec::new(),
                v: Vec::new(),
                t: 0,
                config,
            }),
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Adam".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]) {
        if self.m.len() != param.len() {
            self.m = vec![0.0; param.len()];
            self.v = vec![0.0; param.len()];
        }
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        for (i, (p, g)) in param.iter_mut().zip(gradients.iter()).enumerate() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adam(lr: f32) -> Adam {
        Adam::new(OptimizerConfig::from_name("adam", lr).unwrap()).unwrap()
    }

    #[test]
    fn test_descends() {
        let mut opt = adam(0.1);
        let mut param = vec![1.0, 2.0];
        opt.apply_gradients(&mut param, &[1.0, 1.0]);
        assert!(param[0] < 1.0 && param[1] < 2.0);
    }

    #[test]
    fn test_timestep_advances() {
        let mut opt = adam(0.001);
        let mut param = vec![0.0];
        assert_eq!(opt.timestep(), 0);
        opt.apply_gradients(&mut param, &[1.0]);
        opt.apply_gradients(&mut param, &[1.0]);
        assert_eq!(opt.timestep(), 2);
    }

    #[test]
    fn test_zero_gradient_is_noop() {
        let mut opt = adam(0.1);
        let mut param = vec![1.5];
        opt.apply_gradients(&mut param, &[0.0]);
        assert!((param[0] - 1.5).abs() < 1e-6);
    }
}
