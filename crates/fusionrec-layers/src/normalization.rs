//! Moving-average batch normalization.

use serde::{Deserialize, Serialize};

use crate::error::LayerError;
use crate::layer::ParamVisitor;
use crate::tensor::Tensor;

/// Batch normalization over the batch axis of a `[batch, features]` tensor.
///
/// Training-mode calls normalize with the batch statistics and fold them
/// into exponential moving averages (`moving = decay * moving +
/// (1 - decay) * batch`). Inference-mode calls normalize with the frozen
/// moving statistics and never mutate them. There is no implicit mode: the
/// caller picks `forward_train` or `forward_infer` on every invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm {
    gamma: Tensor,
    beta: Tensor,
    moving_mean: Tensor,
    moving_var: Tensor,
    decay: f32,
    eps: f32,
    num_features: usize,
    cached_input: Option<Tensor>,
    cached_mean: Option<Tensor>,
    cached_var: Option<Tensor>,
    gamma_grad: Option<Tensor>,
    beta_grad: Option<Tensor>,
}

impl BatchNorm {
    /// Default moving-average decay.
    pub const DEFAULT_DECAY: f32 = 0.5;
    /// Default variance epsilon.
    pub const DEFAULT_EPS: f32 = 1e-3;

    /// Creates a batch-norm layer with the default decay and epsilon.
    pub fn new(num_features: usize) -> Self {
        Self::with_params(num_features, Self::DEFAULT_DECAY, Self::DEFAULT_EPS)
    }

    /// Creates a batch-norm layer with explicit decay and epsilon.
    pub fn with_params(num_features: usize, decay: f32, eps: f32) -> Self {
        Self {
            gamma: Tensor::ones(&[num_features]),
            beta: Tensor::zeros(&[num_features]),
            moving_mean: Tensor::zeros(&[num_features]),
            moving_var: Tensor::ones(&[num_features]),
            decay,
            eps,
            num_features,
            cached_input: None,
            cached_mean: None,
            cached_var: None,
            gamma_grad: None,
            beta_grad: None,
        }
    }

    /// Number of normalized features.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// The frozen moving statistics (mean, variance).
    pub fn moving_stats(&self) -> (&Tensor, &Tensor) {
        (&self.moving_mean, &self.moving_var)
    }

    fn check_input(&self, input: &Tensor) -> Result<(), LayerError> {
        if input.ndim() != 2 {
            return Err(LayerError::ForwardError {
                message: format!("BatchNorm expects 2D input, got {}D", input.ndim()),
            });
        }
        if input.shape()[1] != self.num_features {
            return Err(LayerError::InvalidInputDimension {
                expected: self.num_features,
                actual: input.shape()[1],
            });
        }
        Ok(())
    }

    fn normalize(&self, input: &Tensor, mean: &Tensor, var: &Tensor) -> Tensor {
        let (m, n) = (input.shape()[0], input.shape()[1]);
        let mut output = vec![0.0; input.numel()];
        for i in 0..m {
            for j in 0..n {
                let idx = i * n + j;
                let x_hat = (input.data()[idx] - mean.data()[j])
                    / (var.data()[j].max(0.0) + self.eps).sqrt();
                output[idx] = self.gamma.data()[j] * x_hat + self.beta.data()[j];
            }
        }
        Tensor::from_data(input.shape(), output)
    }

    /// Training-mode forward: batch statistics, moving-average update,
    /// caches for backward.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.check_input(input)?;
        let n = self.num_features;

        let mean = input.mean_axis(0);
        let var = input.var_axis0();

        let d = self.decay;
        let mut new_mean = vec![0.0; n];
        let mut new_var = vec![0.0; n];
        for j in 0..n {
            new_mean[j] = d * self.moving_mean.data()[j] + (1.0 - d) * mean.data()[j];
            new_var[j] = d * self.moving_var.data()[j] + (1.0 - d) * var.data()[j];
        }
        self.moving_mean = Tensor::from_data(&[n], new_mean);
        self.moving_var = Tensor::from_data(&[n], new_var);

        self.cached_input = Some(input.clone());
        self.cached_mean = Some(mean.clone());
        self.cached_var = Some(var.clone());

        Ok(self.normalize(input, &mean, &var))
    }

    /// Inference-mode forward: frozen moving statistics, no mutation.
    pub fn forward_infer(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.check_input(input)?;
        Ok(self.normalize(input, &self.moving_mean, &self.moving_var))
    }

    /// Backward through the batch-statistics normalization.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        let mean = self
            .cached_mean
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        let var = self.cached_var.as_ref().ok_or(LayerError::NotInitialized)?;
        if grad.shape() != input.shape() {
            return Err(LayerError::ShapeMismatch {
                expected: input.shape().to_vec(),
                actual: grad.shape().to_vec(),
            });
        }

        let (m, n) = (input.shape()[0], input.shape()[1]);
        let batch = m as f32;

        let mut inv_std = vec![0.0f32; n];
        for j in 0..n {
            inv_std[j] = 1.0 / (var.data()[j].max(0.0) + self.eps).sqrt();
        }
        let mut x_hat = vec![0.0f32; input.numel()];
        for i in 0..m {
            for j in 0..n {
                let idx = i * n + j;
                x_hat[idx] = (input.data()[idx] - mean.data()[j]) * inv_std[j];
            }
        }

        let mut d_beta = vec![0.0f32; n];
        let mut d_gamma = vec![0.0f32; n];
        for i in 0..m {
            for j in 0..n {
                let idx = i * n + j;
                d_beta[j] += grad.data()[idx];
                d_gamma[j] += grad.data()[idx] * x_hat[idx];
            }
        }
        self.beta_grad = Some(Tensor::from_data(&[n], d_beta));
        self.gamma_grad = Some(Tensor::from_data(&[n], d_gamma));

        // dx via the standard per-channel reduction form.
        let mut dx = vec![0.0f32; input.numel()];
        for j in 0..n {
            let mut sum_dxhat = 0.0f32;
            let mut sum_dxhat_xhat = 0.0f32;
            for i in 0..m {
                let idx = i * n + j;
                let dxhat = grad.data()[idx] * self.gamma.data()[j];
                sum_dxhat += dxhat;
                sum_dxhat_xhat += dxhat * x_hat[idx];
            }
            for i in 0..m {
                let idx = i * n + j;
                let dxhat = grad.data()[idx] * self.gamma.data()[j];
                dx[idx] = inv_std[j] / batch
                    * (batch * dxhat - sum_dxhat - x_hat[idx] * sum_dxhat_xhat);
            }
        }

        Ok(Tensor::from_data(input.shape(), dx))
    }

    /// Walks gamma and beta.
    pub fn visit_params(&mut self, prefix: &str, visitor: &mut dyn ParamVisitor) {
        visitor.visit(
            &format!("{prefix}/gamma"),
            &mut self.gamma,
            &mut self.gamma_grad,
        );
        visitor.visit(&format!("{prefix}/beta"), &mut self.beta, &mut self.beta_grad);
    }

    /// Walks the non-trainable moving statistics (for checkpointing).
    pub fn visit_buffers(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut Tensor)) {
        f(&format!("{prefix}/moving_mean"), &mut self.moving_mean);
        f(&format!("{prefix}/moving_var"), &mut self.moving_var);
    }
}
