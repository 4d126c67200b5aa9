//! Parameter regularization.

use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

/// Regularization applied to a parameter group.
///
/// The L2 penalty follows the `sum(x^2) / 2` convention, so its gradient is
/// simply `lambda * x`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub enum Regularizer {
    /// No regularization.
    #[default]
    None,
    /// L1 penalty with coefficient.
    L1(f32),
    /// L2 penalty with coefficient.
    L2(f32),
}

impl Regularizer {
    /// Penalty contributed by the given parameter tensor.
    pub fn loss(&self, param: &Tensor) -> f32 {
        match *self {
            Regularizer::None => 0.0,
            Regularizer::L1(lambda) => param.abs().sum() * lambda,
            Regularizer::L2(lambda) => param.sqr().sum() * 0.5 * lambda,
        }
    }

    /// Gradient contribution for the given parameter tensor.
    pub fn grad(&self, param: &Tensor) -> Option<Tensor> {
        match *self {
            Regularizer::None => None,
            Regularizer::L1(lambda) => Some(param.map(|x| {
                if x > 0.0 {
                    lambda
                } else if x < 0.0 {
                    -lambda
                } else {
                    0.0
                }
            })),
            Regularizer::L2(lambda) => Some(param.scale(lambda)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_half_sum_convention() {
        let p = Tensor::from_data(&[2], vec![3.0, 4.0]);
        let reg = Regularizer::L2(0.1);
        assert!((reg.loss(&p) - 0.5 * 25.0 * 0.1).abs() < 1e-6);
        let g = reg.grad(&p).unwrap();
        assert_eq!(g.data(), &[0.3, 0.4]);
    }

    #[test]
    fn test_none_contributes_nothing() {
        let p = Tensor::ones(&[4]);
        assert_eq!(Regularizer::None.loss(&p), 0.0);
        assert!(Regularizer::None.grad(&p).is_none());
    }

    #[test]
    fn test_l1_sign_gradient() {
        let p = Tensor::from_data(&[3], vec![-2.0, 0.0, 5.0]);
        let g = Regularizer::L1(1.0).grad(&p).unwrap();
        assert_eq!(g.data()[0], -1.0);
        assert_eq!(g.data()[2], 1.0);
    }
}
