//! Weight initializers.
//!
//! Closed enum of the initialization schemes the model uses. Random
//! variants take an explicit seed so graph construction is reproducible.

use serde::{Deserialize, Serialize};

use crate::rng::Lcg;
use crate::tensor::Tensor;

/// Initialization scheme for a parameter tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Initializer {
    /// Glorot/Xavier uniform in [-limit, limit] with limit = sqrt(6 / (fan_in + fan_out)).
    GlorotUniform {
        /// Seed for the random stream.
        seed: u64,
    },
    /// Glorot/Xavier normal with std = sqrt(2 / (fan_in + fan_out)).
    GlorotNormal {
        /// Seed for the random stream.
        seed: u64,
    },
    /// All zeros.
    Zeros,
    /// All ones.
    Ones,
    /// Constant value.
    Constant(f32),
}

impl Initializer {
    /// Materializes a tensor of the given shape.
    pub fn initialize(&self, shape: &[usize]) -> Tensor {
        match *self {
            Initializer::Zeros => Tensor::zeros(shape),
            Initializer::Ones => Tensor::ones(shape),
            Initializer::Constant(value) => {
                Tensor::from_data(shape, vec![value; shape.iter().product()])
            }
            Initializer::GlorotUniform { seed } => {
                let (fan_in, fan_out) = fan_in_out(shape);
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                let mut rng = Lcg::new(seed);
                let n: usize = shape.iter().product();
                let data = (0..n)
                    .map(|_| (2.0 * rng.next_f32() - 1.0) * limit)
                    .collect();
                Tensor::from_data(shape, data)
            }
            Initializer::GlorotNormal { seed } => {
                let (fan_in, fan_out) = fan_in_out(shape);
                let std = (2.0 / (fan_in + fan_out) as f32).sqrt();
                let mut rng = Lcg::new(seed);
                let n: usize = shape.iter().product();
                let data = (0..n).map(|_| rng.next_standard_normal() * std).collect();
                Tensor::from_data(shape, data)
            }
        }
    }
}

fn fan_in_out(shape: &[usize]) -> (usize, usize) {
    if shape.len() >= 2 {
        (shape[0].max(1), shape[1].max(1))
    } else if shape.len() == 1 {
        let dim = shape[0].max(1);
        (dim, dim)
    } else {
        (1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_ones_constant() {
        assert!(Initializer::Zeros
            .initialize(&[3, 3])
            .data()
            .iter()
            .all(|&x| x == 0.0));
        assert!(Initializer::Ones
            .initialize(&[3])
            .data()
            .iter()
            .all(|&x| x == 1.0));
        assert!(Initializer::Constant(0.5)
            .initialize(&[2, 2])
            .data()
            .iter()
            .all(|&x| x == 0.5));
    }

    #[test]
    fn test_glorot_uniform_bounds_and_determinism() {
        let init = Initializer::GlorotUniform { seed: 1024 };
        let a = init.initialize(&[64, 32]);
        let b = init.initialize(&[64, 32]);
        assert_eq!(a.data(), b.data());

        let limit = (6.0f32 / (64 + 32) as f32).sqrt();
        assert!(a.data().iter().all(|&x| x.abs() <= limit));
        // Not degenerate.
        assert!(a.data().iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = Initializer::GlorotUniform { seed: 1 }.initialize(&[8, 8]);
        let b = Initializer::GlorotUniform { seed: 2 }.initialize(&[8, 8]);
        assert_ne!(a.data(), b.data());
    }
}
