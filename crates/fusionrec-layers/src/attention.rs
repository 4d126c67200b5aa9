//! Attention-weighted fusion of item modalities.
//!
//! Each modality vector gets a scalar relevance score conditioned on the
//! user and context vectors:
//!
//! ```text
//! score_i = w_score . relu(Wu*user + Wc*ctx + Wm[i]*mod_i + b) + c
//! ```
//!
//! `Wu`, `Wc`, `b`, `w_score` and `c` are shared across modalities; `Wm[i]`
//! is per-modality. Scores are softmax-normalized per sample across the
//! modality axis, and the fused item vector is the gate-weighted sum of the
//! modality vectors. The modality order is fixed at construction; scoring
//! and reweighting index the same list, so a gate can never drift onto the
//! wrong modality.

use serde::{Deserialize, Serialize};

use crate::activation::softmax_rows;
use crate::error::{LayerError, LayerResult};
use crate::initializer::Initializer;
use crate::layer::ParamVisitor;
use crate::tensor::Tensor;

/// Configuration for [`AttentionFusion`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionFusionConfig {
    /// Shared latent dimension of the user/context/modality vectors.
    pub dim_k: usize,
    /// Hidden dimension of the score projection.
    pub att_dim: usize,
    /// Number of modalities, fixed at construction.
    pub num_modalities: usize,
    /// Seed for weight initialization.
    pub seed: u64,
}

#[derive(Debug, Clone)]
struct FusionCache {
    user: Tensor,
    ctx: Tensor,
    mods: Vec<Tensor>,
    pre: Vec<Tensor>,
    h: Vec<Tensor>,
    gates: Tensor,
}

/// Learned softmax gating over item modalities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionFusion {
    w_user: Tensor,
    w_ctx: Tensor,
    w_modal: Vec<Tensor>,
    bias: Tensor,
    w_score: Tensor,
    score_bias: Tensor,
    dim_k: usize,
    att_dim: usize,

    #[serde(skip)]
    w_user_grad: Option<Tensor>,
    #[serde(skip)]
    w_ctx_grad: Option<Tensor>,
    #[serde(skip)]
    w_modal_grad: Vec<Option<Tensor>>,
    #[serde(skip)]
    bias_grad: Option<Tensor>,
    #[serde(skip)]
    w_score_grad: Option<Tensor>,
    #[serde(skip)]
    score_bias_grad: Option<Tensor>,
    #[serde(skip)]
    cache: Option<FusionCache>,
}

impl AttentionFusion {
    /// Builds the fusion layer from a configuration.
    pub fn new(config: &AttentionFusionConfig) -> LayerResult<Self> {
        if config.num_modalities == 0 {
            return Err(LayerError::ConfigError {
                message: "attention fusion needs at least one modality".to_string(),
            });
        }
        if config.dim_k == 0 || config.att_dim == 0 {
            return Err(LayerError::ConfigError {
                message: "attention dimensions must be positive".to_string(),
            });
        }

        let shape = [config.dim_k, config.att_dim];
        let seed = config.seed;
        let w_modal = (0..config.num_modalities)
            .map(|i| Initializer::GlorotUniform { seed: seed.wrapping_add(10 + i as u64) }
                .initialize(&shape))
            .collect::<Vec<_>>();
        let num = w_modal.len();

        Ok(Self {
            w_user: Initializer::GlorotUniform { seed }.initialize(&shape),
            w_ctx: Initializer::GlorotUniform { seed: seed.wrapping_add(1) }.initialize(&shape),
            w_modal,
            bias: Tensor::zeros(&[config.att_dim]),
            w_score: Initializer::GlorotUniform { seed: seed.wrapping_add(2) }
                .initialize(&[config.att_dim, 1]),
            score_bias: Tensor::zeros(&[1]),
            dim_k: config.dim_k,
            att_dim: config.att_dim,
            w_user_grad: None,
            w_ctx_grad: None,
            w_modal_grad: vec![None; num],
            bias_grad: None,
            w_score_grad: None,
            score_bias_grad: None,
            cache: None,
        })
    }

    /// Number of modalities this layer was built for.
    pub fn num_modalities(&self) -> usize {
        self.w_modal.len()
    }

    fn check_inputs(&self, user: &Tensor, ctx: &Tensor, mods: &[Tensor]) -> LayerResult<usize> {
        if mods.len() != self.w_modal.len() {
            return Err(LayerError::ConfigError {
                message: format!(
                    "expected {} modalities, got {}",
                    self.w_modal.len(),
                    mods.len()
                ),
            });
        }
        let batch = user.shape()[0];
        for t in std::iter::once(user).chain(std::iter::once(ctx)).chain(mods.iter()) {
            if t.shape() != [batch, self.dim_k] {
                return Err(LayerError::ShapeMismatch {
                    expected: vec![batch, self.dim_k],
                    actual: t.shape().to_vec(),
                });
            }
        }
        Ok(batch)
    }

    fn run(&self, user: &Tensor, ctx: &Tensor, mods: &[Tensor]) -> LayerResult<FusionParts> {
        let batch = self.check_inputs(user, ctx, mods)?;
        let num = mods.len();

        let att_u = user.matmul(&self.w_user);
        let att_c = ctx.matmul(&self.w_ctx);
        let shared = att_u.add(&att_c);

        let mut pre = Vec::with_capacity(num);
        let mut h = Vec::with_capacity(num);
        let mut scores = vec![0.0; batch * num];
        for (i, modality) in mods.iter().enumerate() {
            let p = shared.add(&modality.matmul(&self.w_modal[i])).add(&self.bias);
            let a = p.map(|x| x.max(0.0));
            let s = a.matmul(&self.w_score);
            for row in 0..batch {
                scores[row * num + i] = s.data()[row] + self.score_bias.data()[0];
            }
            pre.push(p);
            h.push(a);
        }

        let gates = softmax_rows(&Tensor::from_data(&[batch, num], scores));

        let mut fused = Tensor::zeros(&[batch, self.dim_k]);
        for (i, modality) in mods.iter().enumerate() {
            let col = gate_column(&gates, i);
            fused.add_assign(&modality.scale_rows(&col));
        }

        Ok(FusionParts { pre, h, gates, fused })
    }

    /// Inference-mode fusion. Returns the fused item vector and the
    /// per-sample gates `[batch, num_modalities]`.
    pub fn forward(
        &self,
        user: &Tensor,
        ctx: &Tensor,
        mods: &[Tensor],
    ) -> LayerResult<(Tensor, Tensor)> {
        let parts = self.run(user, ctx, mods)?;
        Ok((parts.fused, parts.gates))
    }

    /// Training-mode fusion; caches activations for [`Self::backward`].
    pub fn forward_train(
        &mut self,
        user: &Tensor,
        ctx: &Tensor,
        mods: &[Tensor],
    ) -> LayerResult<(Tensor, Tensor)> {
        let parts = self.run(user, ctx, mods)?;
        self.cache = Some(FusionCache {
            user: user.clone(),
            ctx: ctx.clone(),
            mods: mods.to_vec(),
            pre: parts.pre,
            h: parts.h,
            gates: parts.gates.clone(),
        });
        Ok((parts.fused, parts.gates))
    }

    /// Backward pass from the fused-vector gradient.
    ///
    /// Returns the gradients with respect to the user vector, the context
    /// vector, and each modality vector (in construction order).
    pub fn backward(&mut self, grad_fused: &Tensor) -> LayerResult<(Tensor, Tensor, Vec<Tensor>)> {
        let cache = self.cache.take().ok_or(LayerError::NotInitialized)?;
        let batch = cache.user.shape()[0];
        let num = cache.mods.len();
        if grad_fused.shape() != [batch, self.dim_k] {
            return Err(LayerError::ShapeMismatch {
                expected: vec![batch, self.dim_k],
                actual: grad_fused.shape().to_vec(),
            });
        }

        // Gate-path gradient: r[row][i] = <grad_fused[row], mod_i[row]>.
        let mut relevance = vec![0.0f32; batch * num];
        for (i, modality) in cache.mods.iter().enumerate() {
            for row in 0..batch {
                let mut dot = 0.0;
                for j in 0..self.dim_k {
                    dot += grad_fused.data()[row * self.dim_k + j]
                        * modality.data()[row * self.dim_k + j];
                }
                relevance[row * num + i] = dot;
            }
        }

        // Softmax backward: d_score = gate * (r - sum_j r_j * gate_j).
        let mut d_scores = vec![0.0f32; batch * num];
        for row in 0..batch {
            let mut weighted = 0.0;
            for i in 0..num {
                weighted += relevance[row * num + i] * cache.gates.data()[row * num + i];
            }
            for i in 0..num {
                let g = cache.gates.data()[row * num + i];
                d_scores[row * num + i] = g * (relevance[row * num + i] - weighted);
            }
        }

        let mut d_w_score = vec![0.0f32; self.att_dim];
        let mut d_score_bias = 0.0f32;
        let mut d_bias = vec![0.0f32; self.att_dim];
        let mut sum_dpre = Tensor::zeros(&[batch, self.att_dim]);
        let mut d_pre_per_mod = Vec::with_capacity(num);

        for i in 0..num {
            let pre = &cache.pre[i];
            let h = &cache.h[i];
            let mut d_pre = vec![0.0f32; batch * self.att_dim];
            for row in 0..batch {
                let ds = d_scores[row * num + i];
                d_score_bias += ds;
                for a in 0..self.att_dim {
                    let idx = row * self.att_dim + a;
                    d_w_score[a] += h.data()[idx] * ds;
                    if pre.data()[idx] > 0.0 {
                        let v = ds * self.w_score.data()[a];
                        d_pre[idx] = v;
                        d_bias[a] += v;
                    }
                }
            }
            let d_pre = Tensor::from_data(&[batch, self.att_dim], d_pre);
            sum_dpre.add_assign(&d_pre);
            d_pre_per_mod.push(d_pre);
        }

        self.w_score_grad = Some(Tensor::from_data(&[self.att_dim, 1], d_w_score));
        self.score_bias_grad = Some(Tensor::from_data(&[1], vec![d_score_bias]));
        self.bias_grad = Some(Tensor::from_data(&[self.att_dim], d_bias));

        self.w_user_grad = Some(cache.user.transpose().matmul(&sum_dpre));
        self.w_ctx_grad = Some(cache.ctx.transpose().matmul(&sum_dpre));
        let grad_user = sum_dpre.matmul(&self.w_user.transpose());
        let grad_ctx = sum_dpre.matmul(&self.w_ctx.transpose());

        let mut grad_mods = Vec::with_capacity(num);
        for i in 0..num {
            self.w_modal_grad[i] =
                Some(cache.mods[i].transpose().matmul(&d_pre_per_mod[i]));
            let col = gate_column(&cache.gates, i);
            let mut g = grad_fused.scale_rows(&col);
            g.add_assign(&d_pre_per_mod[i].matmul(&self.w_modal[i].transpose()));
            grad_mods.push(g);
        }

        Ok((grad_user, grad_ctx, grad_mods))
    }

    /// Walks every attention parameter and its gradient slot.
    pub fn visit_params(&mut self, prefix: &str, visitor: &mut dyn ParamVisitor) {
        visitor.visit(&format!("{prefix}/w_user"), &mut self.w_user, &mut self.w_user_grad);
        visitor.visit(&format!("{prefix}/w_ctx"), &mut self.w_ctx, &mut self.w_ctx_grad);
        for (i, (w, g)) in self.w_modal.iter_mut().zip(self.w_modal_grad.iter_mut()).enumerate() {
            visitor.visit(&format!("{prefix}/w_modal_{i}"), w, g);
        }
        visitor.visit(&format!("{prefix}/bias"), &mut self.bias, &mut self.bias_grad);
        visitor.visit(&format!("{prefix}/w_score"), &mut self.w_score, &mut self.w_score_grad);
        visitor.visit(
            &format!("{prefix}/score_bias"),
            &mut self.score_bias,
            &mut self.score_bias_grad,
        );
    }
}

struct FusionParts {
    pre: Vec<Tensor>,
    h: Vec<Tensor>,
    gates: Tensor,
    fused: Tensor,
}

fn gate_column(gates: &Tensor, i: usize) -> Vec<f32> {
    let (m, n) = (gates.shape()[0], gates.shape()[1]);
    (0..m).map(|row| gates.data()[row * n + i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(num_modalities: usize) -> AttentionFusion {
        AttentionFusion::new(&AttentionFusionConfig {
            dim_k: 4,
            att_dim: 3,
            num_modalities,
            seed: 1024,
        })
        .unwrap()
    }

    fn inputs(batch: usize) -> (Tensor, Tensor, Vec<Tensor>) {
        let mut rng = crate::rng::Lcg::new(5);
        let mut mk = |shape: &[usize]| {
            let n: usize = shape.iter().product();
            Tensor::from_data(shape, (0..n).map(|_| rng.next_f32() - 0.5).collect())
        };
        let user = mk(&[batch, 4]);
        let ctx = mk(&[batch, 4]);
        let mods = vec![mk(&[batch, 4]), mk(&[batch, 4]), mk(&[batch, 4])];
        (user, ctx, mods)
    }

    #[test]
    fn test_gates_sum_to_one_per_sample() {
        let fusion = build(3);
        let (user, ctx, mods) = inputs(6);
        let (_, gates) = fusion.forward(&user, &ctx, &mods).unwrap();
        for row in 0..6 {
            let s: f32 = gates.data()[row * 3..(row + 1) * 3].iter().sum();
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_permuting_modalities_permutes_gates() {
        let fusion = build(3);
        let (user, ctx, mods) = inputs(4);
        let (fused, gates) = fusion.forward(&user, &ctx, &mods).unwrap();

        // Permute the modality list together with the per-modality weights:
        // gate i must follow its modality, and the fused vector must not move.
        let mut permuted = fusion.clone();
        permuted.w_modal.swap(0, 2);
        let swapped = vec![mods[2].clone(), mods[1].clone(), mods[0].clone()];
        let (fused_p, gates_p) = permuted.forward(&user, &ctx, &swapped).unwrap();

        for row in 0..4 {
            assert!((gates.data()[row * 3] - gates_p.data()[row * 3 + 2]).abs() < 1e-5);
            assert!((gates.data()[row * 3 + 2] - gates_p.data()[row * 3]).abs() < 1e-5);
            assert!((gates.data()[row * 3 + 1] - gates_p.data()[row * 3 + 1]).abs() < 1e-5);
        }
        for (a, b) in fused.data().iter().zip(fused_p.data().iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_single_modality_gate_is_one() {
        let fusion = build(1);
        let (user, ctx, mods) = inputs(3);
        let (fused, gates) = fusion.forward(&user, &ctx, &mods[..1]).unwrap();
        assert!(gates.data().iter().all(|&g| (g - 1.0).abs() < 1e-6));
        assert_eq!(fused.data(), mods[0].data());
    }

    #[test]
    fn test_modality_count_mismatch_errors() {
        let fusion = build(3);
        let (user, ctx, mods) = inputs(2);
        assert!(fusion.forward(&user, &ctx, &mods[..2]).is_err());
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut fusion = build(2);
        let (user, ctx, mods) = inputs(3);
        let mods = mods[..2].to_vec();

        // Scalar objective: sum of the fused vector.
        let (fused, _) = fusion.forward_train(&user, &ctx, &mods).unwrap();
        let grad = Tensor::ones(fused.shape());
        let (g_user, _, g_mods) = fusion.backward(&grad).unwrap();

        let eps = 1e-2f32;
        let objective = |f: &AttentionFusion, u: &Tensor, c: &Tensor, m: &[Tensor]| -> f32 {
            f.forward(u, c, m).unwrap().0.sum()
        };

        // Check a user-input coordinate.
        let mut up = user.clone();
        up.data_mut()[1] += eps;
        let mut un = user.clone();
        un.data_mut()[1] -= eps;
        let numeric =
            (objective(&fusion, &up, &ctx, &mods) - objective(&fusion, &un, &ctx, &mods))
                / (2.0 * eps);
        assert!(
            (numeric - g_user.data()[1]).abs() < 2e-2,
            "user grad {} vs numeric {}",
            g_user.data()[1],
            numeric
        );

        // Check a modality-input coordinate (gate path + score path).
        let idx = 5;
        let mut mp = mods.clone();
        mp[0].data_mut()[idx] += eps;
        let mut mn = mods.clone();
        mn[0].data_mut()[idx] -= eps;
        let numeric = (objective(&fusion, &user, &ctx, &mp)
            - objective(&fusion, &user, &ctx, &mn))
            / (2.0 * eps);
        assert!(
            (numeric - g_mods[0].data()[idx]).abs() < 2e-2,
            "modality grad {} vs numeric {}",
            g_mods[0].data()[idx],
            numeric
        );

        // Check a shared attention weight.
        let w_grad = fusion.w_user_grad.as_ref().unwrap().data()[2];
        let mut fp = fusion.clone();
        fp.w_user.data_mut()[2] += eps;
        let mut fn_ = fusion.clone();
        fn_.w_user.data_mut()[2] -= eps;
        let numeric = (objective(&fp, &user, &ctx, &mods)
            - objective(&fn_, &user, &ctx, &mods))
            / (2.0 * eps);
        assert!(
            (numeric - w_grad).abs() < 2e-2,
            "w_user grad {} vs numeric {}",
            w_grad,
            numeric
        );
    }
}
