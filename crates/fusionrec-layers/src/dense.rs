//! Dense (fully connected) layer.

use serde::{Deserialize, Serialize};

use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::{Layer, ParamVisitor};
use crate::tensor::Tensor;

/// A dense layer computing `y = xW + b`.
///
/// - `x` has shape `[batch, in_features]`
/// - `W` has shape `[in_features, out_features]`
/// - `b` has shape `[out_features]`
///
/// # Example
///
/// ```
/// use fusionrec_layers::dense::Dense;
/// use fusionrec_layers::layer::Layer;
/// use fusionrec_layers::tensor::Tensor;
///
/// let layer = Dense::new(128, 64, 7);
/// let input = Tensor::zeros(&[32, 128]);
/// let output = layer.forward(&input).unwrap();
/// assert_eq!(output.shape(), &[32, 64]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    weights: Tensor,
    bias: Tensor,
    use_bias: bool,
    in_features: usize,
    out_features: usize,
    /// Cached input for backward.
    cached_input: Option<Tensor>,
    weights_grad: Option<Tensor>,
    bias_grad: Option<Tensor>,
}

impl Dense {
    /// Creates a dense layer with Glorot-uniform weights and zero bias.
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        Self::with_initializer(
            in_features,
            out_features,
            Initializer::GlorotUniform { seed },
            Initializer::Zeros,
            true,
        )
    }

    /// Creates a dense layer without a bias term.
    pub fn new_no_bias(in_features: usize, out_features: usize, seed: u64) -> Self {
        Self::with_initializer(
            in_features,
            out_features,
            Initializer::GlorotUniform { seed },
            Initializer::Zeros,
            false,
        )
    }

    /// Creates a dense layer with explicit initializers.
    pub fn with_initializer(
        in_features: usize,
        out_features: usize,
        weight_init: Initializer,
        bias_init: Initializer,
        use_bias: bool,
    ) -> Self {
        Self {
            weights: weight_init.initialize(&[in_features, out_features]),
            bias: bias_init.initialize(&[out_features]),
            use_bias,
            in_features,
            out_features,
            cached_input: None,
            weights_grad: None,
            bias_grad: None,
        }
    }

    /// Input feature dimension.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Output feature dimension.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// The weight matrix.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// The bias vector.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Weight gradients from the last backward pass, if any.
    pub fn weights_grad(&self) -> Option<&Tensor> {
        self.weights_grad.as_ref()
    }

    /// Forward pass that caches the input for backward.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.cached_input = Some(input.clone());
        self.forward(input)
    }

    /// Walks the layer's parameters and gradient slots.
    pub fn visit_params(&mut self, prefix: &str, visitor: &mut dyn ParamVisitor) {
        visitor.visit(
            &format!("{prefix}/weights"),
            &mut self.weights,
            &mut self.weights_grad,
        );
        if self.use_bias {
            visitor.visit(&format!("{prefix}/bias"), &mut self.bias, &mut self.bias_grad);
        }
    }
}

impl Layer for Dense {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        if input.ndim() != 2 {
            return Err(LayerError::ForwardError {
                message: format!("expected 2D input, got {}D", input.ndim()),
            });
        }
        if input.shape()[1] != self.in_features {
            return Err(LayerError::InvalidInputDimension {
                expected: self.in_features,
                actual: input.shape()[1],
            });
        }

        let output = input.matmul(&self.weights);
        if self.use_bias {
            Ok(output.add(&self.bias))
        } else {
            Ok(output)
        }
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        if grad.ndim() != 2 || grad.shape()[1] != self.out_features {
            return Err(LayerError::ShapeMismatch {
                expected: vec![input.shape()[0], self.out_features],
                actual: grad.shape().to_vec(),
            });
        }

        // dW = x^T g, db = sum_rows(g), dx = g W^T
        self.weights_grad = Some(input.transpose().matmul(grad));
        if self.use_bias {
            self.bias_grad = Some(grad.sum_axis(0));
        }
        Ok(grad.matmul(&self.weights.transpose()))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        if self.use_bias {
            vec![&self.weights, &self.bias]
        } else {
            vec![&self.weights]
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        if self.use_bias {
            vec![&mut self.weights, &mut self.bias]
        } else {
            vec![&mut self.weights]
        }
    }

    fn name(&self) -> &str {
        "Dense"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_shape() {
        let layer = Dense::new(10, 5, 1);
        let input = Tensor::ones(&[3, 10]);
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[3, 5]);
    }

    #[test]
    fn test_forward_wrong_dim_errors() {
        let layer = Dense::new(10, 5, 1);
        let input = Tensor::ones(&[3, 20]);
        assert!(layer.forward(&input).is_err());
    }

    #[test]
    fn test_backward_gradients() {
        let mut layer = Dense::new(4, 2, 1);
        let input = Tensor::ones(&[3, 4]);
        let _ = layer.forward_train(&input).unwrap();

        let grad = Tensor::ones(&[3, 2]);
        let input_grad = layer.backward(&grad).unwrap();

        assert_eq!(input_grad.shape(), &[3, 4]);
        // dW = x^T g with all-ones: every entry equals the batch size.
        let wg = layer.weights_grad().unwrap();
        assert!(wg.data().iter().all(|&v| (v - 3.0).abs() < 1e-6));
    }

    #[test]
    fn test_backward_without_forward_errors() {
        let mut layer = Dense::new(4, 2, 1);
        let grad = Tensor::ones(&[3, 2]);
        assert!(matches!(
            layer.backward(&grad),
            Err(LayerError::NotInitialized)
        ));
    }

    #[test]
    fn test_identity_weights_roundtrip() {
        let mut layer = Dense::with_initializer(
            2,
            2,
            Initializer::Zeros,
            Initializer::Zeros,
            true,
        );
        // Make it the identity by hand.
        layer.weights = Tensor::from_data(&[2, 2], vec![1.0, 0.0, 0.0, 1.0]);
        let input = Tensor::from_data(&[1, 2], vec![3.0, -4.0]);
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.data(), input.data());
    }

    #[test]
    fn test_visit_params_order() {
        let mut layer = Dense::new(3, 2, 9);
        let mut names = Vec::new();
        layer.visit_params("head", &mut |name: &str, _: &mut Tensor, _: &mut Option<Tensor>| {
            names.push(name.to_string());
        });
        assert_eq!(names, vec!["head/weights", "head/bias"]);
    }
}
