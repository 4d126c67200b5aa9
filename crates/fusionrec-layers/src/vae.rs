//! Variational encoder for raw visual features.
//!
//! Compresses a high-dimensional visual vector into the shared latent
//! space. `encode` returns the latent mean as the modality embedding plus
//! an auxiliary scalar loss (weighted reconstruction error + KL divergence)
//! that the model adds unmodified into its training objective.

use serde::{Deserialize, Serialize};

use crate::activation::ReLU;
use crate::dense::Dense;
use crate::error::{LayerError, LayerResult};
use crate::layer::{Layer, ParamVisitor};
use crate::rng::Lcg;
use crate::tensor::Tensor;

/// Configuration for [`VisualEncoder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualEncoderConfig {
    /// Raw visual feature dimension.
    pub input_dim: usize,
    /// Hidden encoder width.
    pub hidden_dim: usize,
    /// Latent dimension (the shared `dim_k`).
    pub latent_dim: usize,
    /// Weight of the reconstruction term.
    pub recon_weight: f32,
    /// Weight of the KL term.
    pub kld_weight: f32,
    /// Seed for weights and reparameterization noise.
    pub seed: u64,
}

impl VisualEncoderConfig {
    /// Defaults matching the production configuration.
    pub fn new(input_dim: usize, latent_dim: usize, seed: u64) -> Self {
        Self {
            input_dim,
            hidden_dim: 1024,
            latent_dim,
            recon_weight: 1e-3,
            kld_weight: 1e-3,
            seed,
        }
    }
}

#[derive(Debug, Clone)]
struct VaeCache {
    input: Tensor,
    mu: Tensor,
    logvar: Tensor,
    eps: Tensor,
    recon: Tensor,
}

/// Variational auto-encoder head over visual features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualEncoder {
    encoder: Dense,
    encoder_act: ReLU,
    mu_head: Dense,
    logvar_head: Dense,
    decoder: Dense,
    recon_weight: f32,
    kld_weight: f32,
    input_dim: usize,
    latent_dim: usize,
    noise: Lcg,
    #[serde(skip)]
    cache: Option<VaeCache>,
}

impl VisualEncoder {
    /// Builds the encoder from a configuration.
    pub fn new(config: &VisualEncoderConfig) -> Self {
        let s = config.seed;
        Self {
            encoder: Dense::new(config.input_dim, config.hidden_dim, s),
            encoder_act: ReLU::new(),
            mu_head: Dense::new(config.hidden_dim, config.latent_dim, s.wrapping_add(1)),
            logvar_head: Dense::new(config.hidden_dim, config.latent_dim, s.wrapping_add(2)),
            decoder: Dense::new(config.latent_dim, config.input_dim, s.wrapping_add(3)),
            recon_weight: config.recon_weight,
            kld_weight: config.kld_weight,
            input_dim: config.input_dim,
            latent_dim: config.latent_dim,
            noise: Lcg::new(s.wrapping_add(4)),
            cache: None,
        }
    }

    /// Latent dimension.
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Inference-mode encoding: the latent mean, no noise, no loss.
    pub fn encode(&self, input: &Tensor) -> LayerResult<Tensor> {
        let h = self.encoder_act.forward(&self.encoder.forward(input)?)?;
        self.mu_head.forward(&h)
    }

    /// Training-mode encoding.
    ///
    /// Returns the latent mean (the modality embedding handed downstream)
    /// and the auxiliary loss `recon_weight * MSE + kld_weight * KL`,
    /// both derived from a reparameterized sample of the latent.
    pub fn encode_train(&mut self, input: &Tensor) -> LayerResult<(Tensor, f32)> {
        let batch = input.shape()[0];
        let h = self
            .encoder_act
            .forward_train(&self.encoder.forward_train(input)?)?;
        let mu = self.mu_head.forward_train(&h)?;
        let logvar = self.logvar_head.forward_train(&h)?;

        let eps_data: Vec<f32> = (0..mu.numel())
            .map(|_| self.noise.next_standard_normal())
            .collect();
        let eps = Tensor::from_data(mu.shape(), eps_data);
        let std = logvar.map(|lv| (0.5 * lv).exp());
        let z = mu.add(&std.mul(&eps));

        let recon = self.decoder.forward_train(&z)?;

        let diff = recon.sub(input);
        let mse = diff.sqr().sum() / (batch * self.input_dim) as f32;
        let mut kl = 0.0f32;
        for i in 0..mu.numel() {
            let m = mu.data()[i];
            let lv = logvar.data()[i];
            kl += -0.5 * (1.0 + lv - m * m - lv.exp());
        }
        kl /= batch as f32;

        let aux = self.recon_weight * mse + self.kld_weight * kl;
        self.cache = Some(VaeCache {
            input: input.clone(),
            mu: mu.clone(),
            logvar,
            eps,
            recon,
        });
        Ok((mu, aux))
    }

    /// Backward pass. `grad_mu` is the downstream gradient flowing into the
    /// latent mean; the auxiliary-loss gradients are added internally.
    pub fn backward(&mut self, grad_mu: &Tensor) -> LayerResult<()> {
        let cache = self.cache.take().ok_or(LayerError::NotInitialized)?;
        let batch = cache.input.shape()[0] as f32;

        // Reconstruction path.
        let scale = self.recon_weight * 2.0 / (batch * self.input_dim as f32);
        let d_recon = cache.recon.sub(&cache.input).scale(scale);
        let d_z = self.decoder.backward(&d_recon)?;

        // d z / d mu = 1; d z / d logvar = eps * 0.5 * exp(logvar / 2).
        let mut d_mu = grad_mu.clone();
        d_mu.add_assign(&d_z);
        d_mu.add_assign(&cache.mu.scale(self.kld_weight / batch));

        let std_half = cache.logvar.map(|lv| 0.5 * (0.5 * lv).exp());
        let mut d_logvar = d_z.mul(&cache.eps).mul(&std_half);
        let d_kl_logvar = cache
            .logvar
            .map(|lv| -0.5 * (1.0 - lv.exp()) * self.kld_weight / batch);
        d_logvar.add_assign(&d_kl_logvar);

        let mut d_h = self.mu_head.backward(&d_mu)?;
        d_h.add_assign(&self.logvar_head.backward(&d_logvar)?);
        let d_enc = self.encoder_act.backward(&d_h)?;
        let _ = self.encoder.backward(&d_enc)?;
        Ok(())
    }

    /// Walks every encoder/decoder parameter.
    pub fn visit_params(&mut self, prefix: &str, visitor: &mut dyn ParamVisitor) {
        self.encoder.visit_params(&format!("{prefix}/encoder"), visitor);
        self.mu_head.visit_params(&format!("{prefix}/mu"), visitor);
        self.logvar_head.visit_params(&format!("{prefix}/logvar"), visitor);
        self.decoder.visit_params(&format!("{prefix}/decoder"), visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> VisualEncoderConfig {
        VisualEncoderConfig {
            input_dim: 8,
            hidden_dim: 6,
            latent_dim: 4,
            recon_weight: 1e-3,
            kld_weight: 1e-3,
            seed: 1024,
        }
    }

    #[test]
    fn test_encode_shapes() {
        let vae = VisualEncoder::new(&small_config());
        let input = Tensor::rand(&[5, 8]);
        let mu = vae.encode(&input).unwrap();
        assert_eq!(mu.shape(), &[5, 4]);
    }

    #[test]
    fn test_encode_train_returns_finite_loss() {
        let mut vae = VisualEncoder::new(&small_config());
        let input = Tensor::rand(&[5, 8]);
        let (mu, aux) = vae.encode_train(&input).unwrap();
        assert_eq!(mu.shape(), &[5, 4]);
        assert!(aux.is_finite());
        assert!(aux >= 0.0);
    }

    #[test]
    fn test_inference_is_deterministic() {
        let vae = VisualEncoder::new(&small_config());
        let input = Tensor::rand(&[3, 8]);
        let a = vae.encode(&input).unwrap();
        let b = vae.encode(&input).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut vae = VisualEncoder::new(&small_config());
        let grad = Tensor::ones(&[3, 4]);
        assert!(vae.backward(&grad).is_err());
    }

    #[test]
    fn test_backward_populates_all_grads() {
        let mut vae = VisualEncoder::new(&small_config());
        let input = Tensor::rand(&[4, 8]);
        let (mu, _) = vae.encode_train(&input).unwrap();
        vae.backward(&Tensor::ones(mu.shape())).unwrap();

        let mut count = 0;
        vae.visit_params("vae", &mut |_: &str, _: &mut Tensor, grad: &mut Option<Tensor>| {
            assert!(grad.is_some());
            count += 1;
        });
        // Four dense layers, weights + bias each.
        assert_eq!(count, 8);
    }
}
