//! Activation functions.

use serde::{Deserialize, Serialize};

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;

/// Rectified Linear Unit: `f(x) = max(0, x)`.
///
/// # Example
///
/// ```
/// use fusionrec_layers::activation::ReLU;
/// use fusionrec_layers::layer::Layer;
/// use fusionrec_layers::tensor::Tensor;
///
/// let relu = ReLU::new();
/// let input = Tensor::from_data(&[2, 2], vec![-1.0, 0.0, 1.0, 2.0]);
/// let output = relu.forward(&input).unwrap();
/// assert_eq!(output.data(), &[0.0, 0.0, 1.0, 2.0]);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReLU {
    cached_input: Option<Tensor>,
}

impl ReLU {
    /// Creates a new ReLU activation.
    pub fn new() -> Self {
        Self { cached_input: None }
    }

    /// Forward pass that caches the input for backward.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.cached_input = Some(input.clone());
        self.forward(input)
    }
}

impl Layer for ReLU {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.map(|x| x.max(0.0)))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        let mask = input.map(|x| if x > 0.0 { 1.0 } else { 0.0 });
        Ok(grad.mul(&mask))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "ReLU"
    }
}

/// Sigmoid: `f(x) = 1 / (1 + exp(-x))`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sigmoid {
    /// Cached output; the gradient only needs `y * (1 - y)`.
    cached_output: Option<Tensor>,
}

impl Sigmoid {
    /// Creates a new Sigmoid activation.
    pub fn new() -> Self {
        Self {
            cached_output: None,
        }
    }

    /// Forward pass that caches the output for backward.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let output = self.forward(input)?;
        self.cached_output = Some(output.clone());
        Ok(output)
    }
}

impl Layer for Sigmoid {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.map(|x| 1.0 / (1.0 + (-x).exp())))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let output = self
            .cached_output
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        let slope = output.map(|y| y * (1.0 - y));
        Ok(grad.mul(&slope))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "Sigmoid"
    }
}

/// Row-wise softmax of a `[batch, n]` tensor.
///
/// Subtracts the row maximum before exponentiation for numerical stability.
pub fn softmax_rows(input: &Tensor) -> Tensor {
    assert_eq!(input.ndim(), 2, "softmax_rows requires a 2D tensor");
    let (m, n) = (input.shape()[0], input.shape()[1]);
    let mut data = vec![0.0; m * n];
    for i in 0..m {
        let row = &input.data()[i * n..(i + 1) * n];
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut denom = 0.0;
        for j in 0..n {
            let e = (row[j] - max).exp();
            data[i * n + j] = e;
            denom += e;
        }
        for j in 0..n {
            data[i * n + j] /= denom;
        }
    }
    Tensor::from_data(&[m, n], data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_backward_masks_negative_inputs() {
        let mut relu = ReLU::new();
        let input = Tensor::from_data(&[1, 4], vec![-2.0, -0.5, 0.5, 2.0]);
        let _ = relu.forward_train(&input).unwrap();
        let grad = Tensor::ones(&[1, 4]);
        let g = relu.backward(&grad).unwrap();
        assert_eq!(g.data(), &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let s = Sigmoid::new();
        let out = s.forward(&Tensor::zeros(&[2, 2])).unwrap();
        assert!(out.data().iter().all(|&y| (y - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_sigmoid_gradient_peak() {
        let mut s = Sigmoid::new();
        let _ = s.forward_train(&Tensor::zeros(&[1, 1])).unwrap();
        let g = s.backward(&Tensor::ones(&[1, 1])).unwrap();
        // d sigmoid at 0 is 0.25.
        assert!((g.data()[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_rows_normalizes() {
        let input = Tensor::from_data(&[2, 3], vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0]);
        let out = softmax_rows(&input);
        for i in 0..2 {
            let row_sum: f32 = out.data()[i * 3..(i + 1) * 3].iter().sum();
            assert!((row_sum - 1.0).abs() < 1e-6);
        }
        // Larger logits get larger mass.
        assert!(out.data()[2] > out.data()[1]);
    }

    #[test]
    fn test_softmax_rows_stable_for_large_logits() {
        let input = Tensor::from_data(&[1, 2], vec![1000.0, 1000.0]);
        let out = softmax_rows(&input);
        assert!((out.data()[0] - 0.5).abs() < 1e-6);
    }
}
