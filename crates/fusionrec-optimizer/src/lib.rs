//! Gradient optimizers for fusionrec training.
//!
//! Every parameter tensor in the model gets its own optimizer instance so
//! per-parameter state (moments, accumulators) never mixes across tensors.
//! The optimizer menu is a closed enum: unknown names are a configuration
//! error surfaced at startup, never a silent default.
//!
//! # Example
//!
//! ```
//! use fusionrec_optimizer::{Optimizer, OptimizerConfig, Sgd};
//!
//! let config = OptimizerConfig::from_name("sgd", 0.1).unwrap();
//! let mut optimizer = Sgd::new(config).unwrap();
//!
//! let mut param = vec![1.0, 2.0];
//! let grad = vec![0.5, 0.5];
//! optimizer.apply_gradients(&mut param, &grad);
//! assert!(param[0] < 1.0);
//! ```

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod adagrad;
mod adam;
mod ftrl;
mod momentum;
mod rmsprop;
mod sgd;

pub use adagrad::Adagrad;
pub use adam::Adam;
pub use ftrl::Ftrl;
pub use momentum::Momentum;
pub use rmsprop::Rmsprop;
pub use sgd::Sgd;

/// Errors that can occur when configuring an optimizer.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Configuration variant does not match the optimizer type.
    #[error("config mismatch: expected {expected}, got {got}")]
    ConfigMismatch {
        /// Expected optimizer name
        expected: String,
        /// Provided configuration name
        got: String,
    },

    /// Name is not one of the supported optimizers.
    #[error("invalid optimizer name: {0:?}")]
    UnknownOptimizer(String),
}

/// Configuration for each supported optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OptimizerConfig {
    /// Plain stochastic gradient descent.
    Sgd {
        /// Step size.
        learning_rate: f32,
    },
    /// Adam with bias-corrected moment estimates.
    Adam {
        /// Step size.
        learning_rate: f32,
        /// First-moment decay.
        beta1: f32,
        /// Second-moment decay.
        beta2: f32,
        /// Numerical-stability constant.
        epsilon: f32,
    },
    /// Adagrad with a per-coordinate squared-gradient accumulator.
    Adagrad {
        /// Step size.
        learning_rate: f32,
        /// Starting accumulator value.
        initial_accumulator: f32,
    },
    /// RMSprop with a decayed moving average of squared gradients.
    Rmsprop {
        /// Step size.
        learning_rate: f32,
        /// Moving-average decay.
        decay: f32,
        /// Momentum coefficient.
        momentum: f32,
        /// Numerical-stability constant.
        epsilon: f32,
    },
    /// Heavy-ball momentum.
    Momentum {
        /// Step size.
        learning_rate: f32,
        /// Momentum coefficient.
        momentum: f32,
    },
    /// Follow The Regularized Leader.
    Ftrl {
        /// Step size.
        learning_rate: f32,
        /// Learning-rate power (typically -0.5).
        learning_rate_power: f32,
        /// L1 regularization strength.
        l1_reg: f32,
        /// L2 regularization strength.
        l2_reg: f32,
    },
}

impl OptimizerConfig {
    /// Resolves a lowercase optimizer name to a configuration with the
    /// standard hyperparameters at the given learning rate.
    ///
    /// Accepts exactly `sgd`, `adam`, `adagrad`, `rmsprop`, `moment`, and
    /// `ftrl`; anything else is [`OptimizerError::UnknownOptimizer`].
    pub fn from_name(name: &str, learning_rate: f32) -> Result<Self, OptimizerError> {
        match name {
            "sgd" => Ok(OptimizerConfig::Sgd { learning_rate }),
            "adam" => Ok(OptimizerConfig::Adam {
                learning_rate,
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
            }),
            "adagrad" => Ok(OptimizerConfig::Adagrad {
                learning_rate,
                initial_accumulator: 0.1,
            }),
            "rmsprop" => Ok(OptimizerConfig::Rmsprop {
                learning_rate,
                decay: 0.9,
                momentum: 0.0,
                epsilon: 1e-10,
            }),
            "moment" => Ok(OptimizerConfig::Momentum {
                learning_rate,
                momentum: 0.9,
            }),
            "ftrl" => Ok(OptimizerConfig::Ftrl {
                learning_rate,
                learning_rate_power: -0.5,
                l1_reg: 0.0,
                l2_reg: 0.0,
            }),
            other => Err(OptimizerError::UnknownOptimizer(other.to_string())),
        }
    }

    /// Name of the configured optimizer type.
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerConfig::Sgd { .. } => "Sgd",
            OptimizerConfig::Adam { .. } => "Adam",
            OptimizerConfig::Adagrad { .. } => "Adagrad",
            OptimizerConfig::Rmsprop { .. } => "Rmsprop",
            OptimizerConfig::Momentum { .. } => "Momentum",
            OptimizerConfig::Ftrl { .. } => "Ftrl",
        }
    }

    /// The configured learning rate.
    pub fn learning_rate(&self) -> f32 {
        match self {
            OptimizerConfig::Sgd { learning_rate }
            | OptimizerConfig::Adam { learning_rate, .. }
            | OptimizerConfig::Adagrad { learning_rate, .. }
            | OptimizerConfig::Rmsprop { learning_rate, .. }
            | OptimizerConfig::Momentum { learning_rate, .. }
            | OptimizerConfig::Ftrl { learning_rate, .. } => *learning_rate,
        }
    }
}

/// Trait for gradient optimizers.
pub trait Optimizer: Sized {
    /// Creates an optimizer from a matching configuration variant.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::ConfigMismatch`] for a mismatched variant.
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError>;

    /// Updates the parameter slice in place from the gradient slice.
    fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]);

    /// The configuration this optimizer was created from.
    fn config(&self) -> &OptimizerConfig;
}

/// Object-safe mirror of [`Optimizer`] for heterogeneous collections.
pub trait OptimizerDyn {
    /// Updates the parameter slice in place from the gradient slice.
    fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]);

    /// The configuration this optimizer was created from.
    fn config(&self) -> &OptimizerConfig;
}

impl<T: Optimizer> OptimizerDyn for T {
    fn apply_gradients(&mut self, param: &mut [f32], gradients: &[f32]) {
        Optimizer::apply_gradients(self, param, gradients)
    }

    fn config(&self) -> &OptimizerConfig {
        Optimizer::config(self)
    }
}

/// Instantiates the optimizer matching the configuration variant.
pub fn create_optimizer(config: OptimizerConfig) -> Box<dyn OptimizerDyn> {
    match &config {
        OptimizerConfig::Sgd { .. } => Box::new(Sgd::new(config).unwrap()),
        OptimizerConfig::Adam { .. } => Box::new(Adam::new(config).unwrap()),
        OptimizerConfig::Adagrad { .. } => Box::new(Adagrad::new(config).unwrap()),
        OptimizerConfig::Rmsprop { .. } => Box::new(Rmsprop::new(config).unwrap()),
        OptimizerConfig::Momentum { .. } => Box::new(Momentum::new(config).unwrap()),
        OptimizerConfig::Ftrl { .. } => Box::new(Ftrl::new(config).unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_known() {
        for name in ["sgd", "adam", "adagrad", "rmsprop", "moment", "ftrl"] {
            let config = OptimizerConfig::from_name(name, 0.01).unwrap();
            assert!((config.learning_rate() - 0.01).abs() < 1e-9);
        }
    }

    #[test]
    fn test_from_name_unknown_is_config_error() {
        let err = OptimizerConfig::from_name("adadelta", 0.01).unwrap_err();
        assert!(matches!(err, OptimizerError::UnknownOptimizer(_)));
        assert!(err.to_string().contains("adadelta"));
    }

    #[test]
    fn test_create_all_types() {
        for name in ["sgd", "adam", "adagrad", "rmsprop", "moment", "ftrl"] {
            let config = OptimizerConfig::from_name(name, 0.05).unwrap();
            let mut optimizer = create_optimizer(config);
            let mut param = vec![1.0, -1.0, 0.5];
            let grad = vec![0.1, -0.1, 0.0];
            optimizer.apply_gradients(&mut param, &grad);
            assert!(param.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = OptimizerConfig::from_name("adam", 0.001).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: OptimizerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.name(), back.name());
    }
}
