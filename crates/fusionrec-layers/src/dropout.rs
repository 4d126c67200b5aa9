//! Inverted dropout.

use serde::{Deserialize, Serialize};

use crate::error::LayerError;
use crate::layer::Layer;
use crate::rng::Lcg;
use crate::tensor::Tensor;

/// Dropout layer using the inverted convention: surviving activations are
/// scaled by `1 / (1 - rate)` during training so inference is the identity.
///
/// The keep/drop mask comes from a seeded stream, so a fixed seed plus a
/// fixed call sequence reproduces the same masks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    rate: f32,
    rng: Lcg,
    cached_mask: Option<Tensor>,
}

impl Dropout {
    /// Creates a dropout layer. `rate` is the drop probability in [0, 1).
    pub fn new(rate: f32, seed: u64) -> Self {
        assert!((0.0..1.0).contains(&rate), "dropout rate must be in [0, 1)");
        Self {
            rate,
            rng: Lcg::new(seed),
            cached_mask: None,
        }
    }

    /// Current drop rate.
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Changes the drop rate. The training loop owns the rate; evaluation
    /// paths never call the training forward at all.
    pub fn set_rate(&mut self, rate: f32) {
        assert!((0.0..1.0).contains(&rate), "dropout rate must be in [0, 1)");
        self.rate = rate;
    }

    /// Training-mode forward: samples a fresh mask and caches it.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        if self.rate == 0.0 {
            self.cached_mask = Some(Tensor::ones(input.shape()));
            return Ok(input.clone());
        }
        let keep_scale = 1.0 / (1.0 - self.rate);
        let mask_data: Vec<f32> = (0..input.numel())
            .map(|_| {
                if self.rng.next_f32() < self.rate {
                    0.0
                } else {
                    keep_scale
                }
            })
            .collect();
        let mask = Tensor::from_data(input.shape(), mask_data);
        let output = input.mul(&mask);
        self.cached_mask = Some(mask);
        Ok(output)
    }
}

impl Layer for Dropout {
    /// Inference-mode forward is the identity.
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.clone())
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let mask = self
            .cached_mask
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        Ok(grad.mul(mask))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "Dropout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_is_identity() {
        let dropout = Dropout::new(0.5, 3);
        let input = Tensor::rand(&[4, 8]);
        let out = dropout.forward(&input).unwrap();
        assert_eq!(out.data(), input.data());
    }

    #[test]
    fn test_zero_rate_is_identity_in_training() {
        let mut dropout = Dropout::new(0.0, 3);
        let input = Tensor::rand(&[4, 8]);
        let out = dropout.forward_train(&input).unwrap();
        assert_eq!(out.data(), input.data());
    }

    #[test]
    fn test_training_mask_zeroes_and_scales() {
        let mut dropout = Dropout::new(0.5, 11);
        let input = Tensor::ones(&[16, 16]);
        let out = dropout.forward_train(&input).unwrap();
        let mut zeros = 0usize;
        for &v in out.data() {
            assert!(v == 0.0 || (v - 2.0).abs() < 1e-6);
            if v == 0.0 {
                zeros += 1;
            }
        }
        // With 256 draws at rate 0.5 both outcomes must appear.
        assert!(zeros > 0 && zeros < 256);
    }

    #[test]
    fn test_backward_reuses_mask() {
        let mut dropout = Dropout::new(0.5, 11);
        let input = Tensor::ones(&[8, 8]);
        let out = dropout.forward_train(&input).unwrap();
        let grad = dropout.backward(&Tensor::ones(&[8, 8])).unwrap();
        // Gradient flows exactly where activations survived.
        for (o, g) in out.data().iter().zip(grad.data().iter()) {
            assert_eq!(o == &0.0, g == &0.0);
        }
    }
}
