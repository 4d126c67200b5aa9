//! Core layer trait and the parameter visitor.

use crate::error::LayerError;
use crate::tensor::Tensor;

/// A neural network layer with explicit forward and backward passes.
///
/// `forward` is the inference path and never mutates the layer. Training
/// goes through each layer's inherent `forward_train`, which caches the
/// activations `backward` needs. `backward` consumes the cached state,
/// stores parameter gradients on the layer, and returns the gradient with
/// respect to the layer input.
pub trait Layer {
    /// Inference-mode forward pass.
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError>;

    /// Backward pass; requires a prior training-mode forward.
    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError>;

    /// References to the layer's learnable parameters.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Mutable references to the layer's learnable parameters.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Layer name for logging.
    fn name(&self) -> &str {
        "Layer"
    }
}

/// Visitor over named parameters and their gradient slots.
///
/// Components expose `visit_params(prefix, visitor)` so the model can walk
/// every trainable tensor in a fixed order. The optimizer step, the
/// regularizer application, and checkpoint export all reuse the same walk.
pub trait ParamVisitor {
    /// Called once per parameter.
    fn visit(&mut self, name: &str, param: &mut Tensor, grad: &mut Option<Tensor>);
}

impl<F> ParamVisitor for F
where
    F: FnMut(&str, &mut Tensor, &mut Option<Tensor>),
{
    fn visit(&mut self, name: &str, param: &mut Tensor, grad: &mut Option<Tensor>) {
        self(name, param, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity {
        weight: Tensor,
        weight_grad: Option<Tensor>,
    }

    impl Layer for Identity {
        fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
            Ok(input.clone())
        }

        fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
            Ok(grad.clone())
        }

        fn parameters(&self) -> Vec<&Tensor> {
            vec![&self.weight]
        }

        fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
            vec![&mut self.weight]
        }

        fn name(&self) -> &str {
            "Identity"
        }
    }

    #[test]
    fn test_layer_trait_object() {
        let mut layer = Identity {
            weight: Tensor::zeros(&[2, 2]),
            weight_grad: None,
        };
        let input = Tensor::ones(&[3, 2]);
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.shape(), input.shape());
        assert_eq!(layer.parameters().len(), 1);

        let mut seen = Vec::new();
        let mut visitor = |name: &str, param: &mut Tensor, _grad: &mut Option<Tensor>| {
            seen.push((name.to_string(), param.numel()));
        };
        visitor.visit("identity/weight", &mut layer.weight, &mut layer.weight_grad);
        assert_eq!(seen, vec![("identity/weight".to_string(), 4)]);
    }
}
