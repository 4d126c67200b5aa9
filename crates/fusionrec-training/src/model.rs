//! The attention-fusion click-through recommender.
//!
//! `FusionModel` fuses a user embedding with multi-modal item content
//! (bag-of-words, a variational visual embedding, a topic vector, and one
//! categorical embedding per one-hot field) through learned softmax
//! attention gates, concatenates the interaction terms with a deep feature
//! tower, and predicts click probability through a dense scoring head.
//!
//! Parameters live in three groups: the embedding/bias group (L2 at `reg`),
//! the attention group (L2 at `att_reg`), and everything else
//! (unregularized). Every group is walked through [`ParamVisitor`], and the
//! optimizer step, the regularizer application, and checkpoint export all
//! reuse the same walk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fusionrec_checkpoint::{
    BinaryCheckpointer, Checkpointer, JsonCheckpointer, ModelState,
};
use fusionrec_data::{TableSchema, TableView};
use fusionrec_layers::{
    AttentionFusion, AttentionFusionConfig, BatchNorm, Dense, Dropout, EmbeddingTable, Layer,
    LayerError, ParamVisitor, ReLU, Regularizer, SparseBow, Tensor, VisualEncoder,
    VisualEncoderConfig,
};
use fusionrec_optimizer::{create_optimizer, OptimizerConfig, OptimizerDyn};

use crate::contract::{ClassWeights, TrainableModel};
use crate::error::{ModelError, ModelResult};
use crate::features::BatchFeatures;
use crate::metrics::Metric;

/// Construction parameters for [`FusionModel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionModelConfig {
    /// Number of distinct users.
    pub num_users: usize,
    /// Word vocabulary size.
    pub num_words: usize,
    /// Cardinality of each categorical one-hot field, in declared order.
    pub one_hot_dims: Vec<usize>,
    /// Shared latent dimension of all modality vectors.
    pub dim_k: usize,
    /// Hidden dimension of the attention score projection.
    pub att_dim_k: usize,
    /// Width of the topic-model vector.
    pub dim_lda: usize,
    /// Width of the raw visual feature vector.
    pub visual_dim: usize,
    /// Width of the numeric context vector.
    pub context_dim: usize,
    /// Width of the numeric face-statistics vector.
    pub face_dim: usize,
    /// Width of the precomputed external user profile vectors.
    pub profile_dim: usize,
    /// L2 coefficient for the embedding/bias parameter group.
    pub reg: f32,
    /// L2 coefficient for the attention parameter group.
    pub att_reg: f32,
    /// Optimizer step size.
    pub learning_rate: f32,
    /// Optimizer name, one of `sgd`/`adam`/`adagrad`/`rmsprop`/`moment`/`ftrl`.
    pub optimizer: String,
    /// Evaluation metric name; `None` falls back to `logloss`.
    pub metric: Option<String>,
    /// Seed for every random stream in the model.
    pub seed: u64,
    /// Whether to build the deep feature tower.
    pub use_deep: bool,
    /// Hidden widths of the deep tower.
    pub deep_dims: Vec<usize>,
    /// Hidden widths of the scoring head.
    pub head_dims: Vec<usize>,
    /// Hidden width of the variational visual encoder.
    pub vae_hidden_dim: usize,
    /// Weight of the visual encoder's reconstruction loss.
    pub vae_recon_weight: f32,
    /// Weight of the visual encoder's KL loss.
    pub vae_kld_weight: f32,
    /// Drop rate for the deep tower and scoring head.
    pub dropout_deep: f32,
    /// Drop rate for the interaction terms.
    pub dropout_emb: f32,
    /// Checkpoint base of `dir/subdir/name` shape; validated at
    /// construction.
    pub checkpoint_path: Option<String>,
}

impl Default for FusionModelConfig {
    /// The production configuration of the original training runs.
    fn default() -> Self {
        Self {
            num_users: 15141,
            num_words: 119637,
            one_hot_dims: Vec::new(),
            dim_k: 96,
            att_dim_k: 16,
            dim_lda: 6,
            visual_dim: 2048,
            context_dim: 8,
            face_dim: 31,
            profile_dim: 128,
            reg: 1e-3,
            att_reg: 0.1,
            learning_rate: 5e-4,
            optimizer: "adam".to_string(),
            metric: None,
            seed: 1024,
            use_deep: true,
            deep_dims: vec![1024, 512, 256],
            head_dims: vec![256, 128, 64, 32],
            vae_hidden_dim: 1024,
            vae_recon_weight: 1e-3,
            vae_kld_weight: 1e-3,
            dropout_deep: 0.5,
            dropout_emb: 0.5,
            checkpoint_path: None,
        }
    }
}

/// Additive decomposition of the training objective.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossBreakdown {
    /// Mean binary cross-entropy of the predictions.
    pub cross_entropy: f64,
    /// `reg`-weighted L2 of the embedding/bias group.
    pub embedding_l2: f64,
    /// `att_reg`-weighted L2 of the attention group.
    pub attention_l2: f64,
    /// Auxiliary loss from the variational visual encoder.
    pub auxiliary: f64,
}

impl LossBreakdown {
    /// The full objective value.
    pub fn total(&self) -> f64 {
        self.cross_entropy + self.embedding_l2 + self.attention_l2 + self.auxiliary
    }
}

/// Activations the backward pass needs beyond what the layers cache
/// themselves.
struct ForwardCache {
    user_indices: Vec<usize>,
    words: SparseBow,
    one_hots: Vec<Vec<usize>>,
    user_emb_vecs: Tensor,
    user_expr: Tensor,
    ctx_emb: Tensor,
    item_expr: Tensor,
    deep_width: Option<usize>,
    probs: Vec<f32>,
}

/// Attention-weighted multi-modal recommender with a manual backward pass.
pub struct FusionModel {
    config: FusionModelConfig,
    optimizer_config: OptimizerConfig,
    metric: Metric,
    global_step: u64,

    // User side.
    user_emb: EmbeddingTable,
    user_profiles: EmbeddingTable,
    profile_proj: Dense,
    profile_act: ReLU,
    user_bias: EmbeddingTable,

    // Context encoder.
    ctx_proj: Dense,
    ctx_bn: BatchNorm,
    ctx_act: ReLU,

    // Item modalities, fused in the order words, visual, topic, one-hots.
    word_emb: EmbeddingTable,
    word_act: ReLU,
    visual_encoder: VisualEncoder,
    visual_bn: BatchNorm,
    lda_proj: Dense,
    one_hot_tables: Vec<EmbeddingTable>,
    fusion: AttentionFusion,

    // Deep tower.
    deep_one_hot_tables: Vec<EmbeddingTable>,
    deep_layers: Vec<Dense>,
    deep_acts: Vec<ReLU>,
    deep_bn: Option<BatchNorm>,
    deep_dropouts: Vec<Dropout>,
    deep_input_widths: Vec<usize>,

    // Scoring head.
    cf_dropout: Dropout,
    ctx_user_dropout: Dropout,
    ctx_item_dropout: Dropout,
    head_layers: Vec<Dense>,
    head_acts: Vec<ReLU>,
    head_dropouts: Vec<Dropout>,
    head_out: Dense,

    optimizers: HashMap<String, Box<dyn OptimizerDyn>>,
    cache: Option<ForwardCache>,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl FusionModel {
    /// Builds the model.
    ///
    /// `user_profiles` is the precomputed `[num_users, profile_dim]` matrix
    /// of external user profile vectors; it is looked up by user index and
    /// never trained.
    pub fn new(config: FusionModelConfig, user_profiles: Tensor) -> ModelResult<Self> {
        if let Some(path) = &config.checkpoint_path {
            if path.matches('/').count() < 2 {
                return Err(ModelError::InvalidCheckpointPath(path.clone()));
            }
        }
        if config.dim_k == 0 || config.att_dim_k == 0 {
            return Err(ModelError::Config(
                "dim_k and att_dim_k must be positive".to_string(),
            ));
        }
        if user_profiles.shape() != [config.num_users, config.profile_dim] {
            return Err(ModelError::Config(format!(
                "user profile matrix has shape {:?}, expected [{}, {}]",
                user_profiles.shape(),
                config.num_users,
                config.profile_dim
            )));
        }

        let optimizer_config =
            OptimizerConfig::from_name(&config.optimizer, config.learning_rate)?;
        let metric = match &config.metric {
            Some(name) => Metric::from_name(name)?,
            None => Metric::LogLoss,
        };

        let s = config.seed;
        let fields = config.one_hot_dims.len();
        let dim_k = config.dim_k;

        let fusion = AttentionFusion::new(&AttentionFusionConfig {
            dim_k,
            att_dim: config.att_dim_k,
            num_modalities: 3 + fields,
            seed: s.wrapping_add(100),
        })?;

        let visual_encoder = VisualEncoder::new(&VisualEncoderConfig {
            input_dim: config.visual_dim,
            hidden_dim: config.vae_hidden_dim,
            latent_dim: dim_k,
            recon_weight: config.vae_recon_weight,
            kld_weight: config.vae_kld_weight,
            seed: s.wrapping_add(200),
        });

        let one_hot_tables = config
            .one_hot_dims
            .iter()
            .enumerate()
            .map(|(i, &dim)| EmbeddingTable::new(dim, dim_k, s.wrapping_add(10 + i as u64)))
            .collect();

        let mut deep_one_hot_tables = Vec::new();
        let mut deep_layers = Vec::new();
        let mut deep_acts = Vec::new();
        let mut deep_dropouts = Vec::new();
        let mut deep_bn = None;
        let mut deep_input_widths = Vec::new();
        if config.use_deep {
            deep_one_hot_tables = config
                .one_hot_dims
                .iter()
                .enumerate()
                .map(|(i, &dim)| EmbeddingTable::new(dim, dim_k, s.wrapping_add(320 + i as u64)))
                .collect();
            deep_input_widths = vec![config.context_dim, config.visual_dim];
            deep_input_widths.extend(std::iter::repeat(dim_k).take(fields));

            let mut width: usize = deep_input_widths.iter().sum();
            for (i, &dim) in config.deep_dims.iter().enumerate() {
                deep_layers.push(Dense::new(width, dim, s.wrapping_add(300 + i as u64)));
                deep_acts.push(ReLU::new());
                deep_dropouts.push(Dropout::new(config.dropout_deep, s.wrapping_add(510 + i as u64)));
                width = dim;
            }
            if let Some(&first) = config.deep_dims.first() {
                deep_bn = Some(BatchNorm::new(first));
            }
        }

        let deep_width = if config.use_deep {
            config
                .deep_dims
                .last()
                .copied()
                .unwrap_or_else(|| deep_input_widths.iter().sum())
        } else {
            0
        };

        let mut head_layers = Vec::new();
        let mut head_acts = Vec::new();
        let mut head_dropouts = Vec::new();
        let mut width = 3 * dim_k + deep_width;
        for (i, &dim) in config.head_dims.iter().enumerate() {
            head_layers.push(Dense::new(width, dim, s.wrapping_add(400 + i as u64)));
            head_acts.push(ReLU::new());
            head_dropouts.push(Dropout::new(config.dropout_deep, s.wrapping_add(530 + i as u64)));
            width = dim;
        }
        let head_out = Dense::new(width, 1, s.wrapping_add(450));

        Ok(Self {
            user_emb: EmbeddingTable::new(config.num_users, dim_k, s),
            user_profiles: EmbeddingTable::from_tensor(user_profiles),
            profile_proj: Dense::new_no_bias(config.profile_dim, dim_k, s.wrapping_add(1)),
            profile_act: ReLU::new(),
            user_bias: EmbeddingTable::zeros(config.num_users, 1),
            ctx_proj: Dense::new_no_bias(config.context_dim, dim_k, s.wrapping_add(2)),
            ctx_bn: BatchNorm::new(dim_k),
            ctx_act: ReLU::new(),
            word_emb: EmbeddingTable::new(config.num_words, dim_k, s.wrapping_add(3)),
            word_act: ReLU::new(),
            visual_encoder,
            visual_bn: BatchNorm::new(dim_k),
            lda_proj: Dense::new_no_bias(config.dim_lda, dim_k, s.wrapping_add(4)),
            one_hot_tables,
            fusion,
            deep_one_hot_tables,
            deep_layers,
            deep_acts,
            deep_bn,
            deep_dropouts,
            deep_input_widths,
            cf_dropout: Dropout::new(config.dropout_emb, s.wrapping_add(500)),
            ctx_user_dropout: Dropout::new(config.dropout_emb, s.wrapping_add(501)),
            ctx_item_dropout: Dropout::new(config.dropout_emb, s.wrapping_add(502)),
            head_layers,
            head_acts,
            head_dropouts,
            head_out,
            optimizers: HashMap::new(),
            cache: None,
            config,
            optimizer_config,
            metric,
            global_step: 0,
        })
    }

    /// The model configuration.
    pub fn config(&self) -> &FusionModelConfig {
        &self.config
    }

    /// Number of optimizer steps taken.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// The table schema this model consumes.
    pub fn schema(&self) -> TableSchema {
        TableSchema {
            visual_dim: self.config.visual_dim,
            topic_dim: self.config.dim_lda,
            context_dim: self.config.context_dim,
            face_dim: self.config.face_dim,
            one_hot_fields: self.config.one_hot_dims.len(),
        }
    }

    /// Inference-mode prediction: probabilities in `[0, 1]`.
    pub fn predict(&self, batch: &BatchFeatures) -> ModelResult<Vec<f32>> {
        Ok(self.infer(batch)?.0)
    }

    fn infer(&self, batch: &BatchFeatures) -> ModelResult<(Vec<f32>, Vec<f32>)> {
        batch.check_schema(&self.schema())?;
        if batch.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let user_emb_vecs = self.user_emb.lookup(&batch.user_indices)?;
        let profiles = self.user_profiles.lookup(&batch.user_indices)?;
        let prof = self.profile_act.forward(&self.profile_proj.forward(&profiles)?)?;
        let user_expr = user_emb_vecs.add(&prof);

        let ctx_emb = self
            .ctx_act
            .forward(&self.ctx_bn.forward_infer(&self.ctx_proj.forward(&batch.context)?)?)?;

        let words_mod = self.word_act.forward(&batch.words.matmul(self.word_emb.weights())?)?;
        let visual_mod = self
            .visual_bn
            .forward_infer(&self.visual_encoder.encode(&batch.visual)?)?;
        let topic_mod = self.lda_proj.forward(&batch.topics)?;

        let mut mods = vec![words_mod, visual_mod, topic_mod];
        for (field, table) in self.one_hot_tables.iter().enumerate() {
            mods.push(table.lookup(&batch.one_hots[field])?);
        }
        let (item_expr, _gates) = self.fusion.forward(&user_emb_vecs, &ctx_emb, &mods)?;

        let deep_hidden = if self.config.use_deep {
            let mut deep_oh = Vec::with_capacity(self.deep_one_hot_tables.len());
            for (field, table) in self.deep_one_hot_tables.iter().enumerate() {
                deep_oh.push(table.lookup(&batch.one_hots[field])?);
            }
            let mut parts: Vec<&Tensor> = vec![&batch.context, &batch.visual];
            parts.extend(deep_oh.iter());
            let mut h = Tensor::concat_cols(&parts);
            for (i, layer) in self.deep_layers.iter().enumerate() {
                h = self.deep_acts[i].forward(&layer.forward(&h)?)?;
                if i == 0 {
                    if let Some(bn) = &self.deep_bn {
                        h = bn.forward_infer(&h)?;
                    }
                }
            }
            Some(h)
        } else {
            None
        };

        let cf = item_expr.mul(&user_expr);
        let cu = ctx_emb.mul(&user_expr);
        let ci = ctx_emb.mul(&item_expr);
        let mut hidden = match &deep_hidden {
            Some(d) => Tensor::concat_cols(&[&cf, &cu, &ci, d]),
            None => Tensor::concat_cols(&[&cf, &cu, &ci]),
        };
        for (i, layer) in self.head_layers.iter().enumerate() {
            hidden = self.head_acts[i].forward(&layer.forward(&hidden)?)?;
        }
        let logit = self
            .head_out
            .forward(&hidden)?
            .add(&self.user_bias.lookup(&batch.user_indices)?);

        let logits: Vec<f32> = logit.data().to_vec();
        let probs = logits.iter().map(|&x| sigmoid(x)).collect();
        Ok((probs, logits))
    }

    /// Training-mode forward pass. Returns the probabilities and the
    /// auxiliary visual-encoder loss, and caches everything backward needs.
    fn forward_train(&mut self, batch: &BatchFeatures) -> ModelResult<(Vec<f32>, f32)> {
        let user_emb_vecs = self.user_emb.lookup(&batch.user_indices)?;
        let profiles = self.user_profiles.lookup(&batch.user_indices)?;
        let prof = self.profile_proj.forward_train(&profiles)?;
        let prof = self.profile_act.forward_train(&prof)?;
        let user_expr = user_emb_vecs.add(&prof);

        let ctx = self.ctx_proj.forward_train(&batch.context)?;
        let ctx = self.ctx_bn.forward_train(&ctx)?;
        let ctx_emb = self.ctx_act.forward_train(&ctx)?;

        let words = batch.words.matmul(self.word_emb.weights())?;
        let words_mod = self.word_act.forward_train(&words)?;

        let (visual_mu, aux) = self.visual_encoder.encode_train(&batch.visual)?;
        let visual_mod = self.visual_bn.forward_train(&visual_mu)?;

        let topic_mod = self.lda_proj.forward_train(&batch.topics)?;

        let mut mods = vec![words_mod, visual_mod, topic_mod];
        for (field, table) in self.one_hot_tables.iter().enumerate() {
            mods.push(table.lookup(&batch.one_hots[field])?);
        }
        let (item_expr, _gates) = self.fusion.forward_train(&user_emb_vecs, &ctx_emb, &mods)?;

        let deep_hidden = if self.config.use_deep {
            let mut deep_oh = Vec::with_capacity(self.deep_one_hot_tables.len());
            for (field, table) in self.deep_one_hot_tables.iter().enumerate() {
                deep_oh.push(table.lookup(&batch.one_hots[field])?);
            }
            let mut parts: Vec<&Tensor> = vec![&batch.context, &batch.visual];
            parts.extend(deep_oh.iter());
            let mut h = Tensor::concat_cols(&parts);
            for i in 0..self.deep_layers.len() {
                h = self.deep_layers[i].forward_train(&h)?;
                h = self.deep_acts[i].forward_train(&h)?;
                if i == 0 {
                    if let Some(bn) = self.deep_bn.as_mut() {
                        h = bn.forward_train(&h)?;
                    }
                }
                h = self.deep_dropouts[i].forward_train(&h)?;
            }
            Some(h)
        } else {
            None
        };

        let cf = self.cf_dropout.forward_train(&item_expr.mul(&user_expr))?;
        let cu = self.ctx_user_dropout.forward_train(&ctx_emb.mul(&user_expr))?;
        let ci = self.ctx_item_dropout.forward_train(&ctx_emb.mul(&item_expr))?;

        let mut hidden = match &deep_hidden {
            Some(d) => Tensor::concat_cols(&[&cf, &cu, &ci, d]),
            None => Tensor::concat_cols(&[&cf, &cu, &ci]),
        };
        for i in 0..self.head_layers.len() {
            hidden = self.head_layers[i].forward_train(&hidden)?;
            hidden = self.head_acts[i].forward_train(&hidden)?;
            hidden = self.head_dropouts[i].forward_train(&hidden)?;
        }
        let logit = self
            .head_out
            .forward_train(&hidden)?
            .add(&self.user_bias.lookup(&batch.user_indices)?);
        let probs: Vec<f32> = logit.data().iter().map(|&x| sigmoid(x)).collect();

        self.cache = Some(ForwardCache {
            user_indices: batch.user_indices.clone(),
            words: batch.words.clone(),
            one_hots: batch.one_hots.clone(),
            user_emb_vecs,
            user_expr,
            ctx_emb,
            item_expr,
            deep_width: deep_hidden.as_ref().map(Tensor::cols),
            probs: probs.clone(),
        });
        Ok((probs, aux))
    }

    /// Manual backward pass mirroring the forward graph. Leaves every
    /// parameter gradient on its layer; no update happens here.
    fn backward(&mut self, labels: &[f32]) -> ModelResult<()> {
        let cache = self.cache.take().ok_or(LayerError::NotInitialized)?;
        let batch = labels.len();
        let scale = 1.0 / batch as f32;

        // Mean cross-entropy through the sigmoid: d loss / d logit = (p - y) / n.
        let d_logit = Tensor::from_data(
            &[batch, 1],
            cache
                .probs
                .iter()
                .zip(labels.iter())
                .map(|(&p, &y)| (p - y) * scale)
                .collect(),
        );

        self.user_bias.accumulate_grad(&cache.user_indices, &d_logit)?;

        let mut d_hidden = self.head_out.backward(&d_logit)?;
        for i in (0..self.head_layers.len()).rev() {
            d_hidden = self.head_dropouts[i].backward(&d_hidden)?;
            d_hidden = self.head_acts[i].backward(&d_hidden)?;
            d_hidden = self.head_layers[i].backward(&d_hidden)?;
        }

        let dim_k = self.config.dim_k;
        let mut widths = vec![dim_k, dim_k, dim_k];
        if let Some(w) = cache.deep_width {
            widths.push(w);
        }
        let parts = d_hidden.split_cols(&widths);

        let d_cf = self.cf_dropout.backward(&parts[0])?;
        let d_cu = self.ctx_user_dropout.backward(&parts[1])?;
        let d_ci = self.ctx_item_dropout.backward(&parts[2])?;

        // Product rule for the three interaction terms.
        let mut d_item = d_cf.mul(&cache.user_expr);
        let mut d_user = d_cf.mul(&cache.item_expr);
        let mut d_ctx = d_cu.mul(&cache.user_expr);
        d_user.add_assign(&d_cu.mul(&cache.ctx_emb));
        d_item.add_assign(&d_ci.mul(&cache.ctx_emb));
        d_ctx.add_assign(&d_ci.mul(&cache.item_expr));

        if cache.deep_width.is_some() {
            let mut d = parts[3].clone();
            for i in (0..self.deep_layers.len()).rev() {
                d = self.deep_dropouts[i].backward(&d)?;
                if i == 0 {
                    if let Some(bn) = self.deep_bn.as_mut() {
                        d = bn.backward(&d)?;
                    }
                }
                d = self.deep_acts[i].backward(&d)?;
                d = self.deep_layers[i].backward(&d)?;
            }
            // Context and visual are raw inputs; only the deep one-hot
            // tables receive gradient.
            let dparts = d.split_cols(&self.deep_input_widths);
            for (field, table) in self.deep_one_hot_tables.iter_mut().enumerate() {
                table.accumulate_grad(&cache.one_hots[field], &dparts[2 + field])?;
            }
        }

        let (d_att_user, d_att_ctx, d_mods) = self.fusion.backward(&d_item)?;
        d_ctx.add_assign(&d_att_ctx);

        let d_words = self.word_act.backward(&d_mods[0])?;
        cache
            .words
            .accumulate_table_grad(&d_words, self.word_emb.grad_mut())?;

        let d_mu = self.visual_bn.backward(&d_mods[1])?;
        self.visual_encoder.backward(&d_mu)?;

        let _ = self.lda_proj.backward(&d_mods[2])?;

        for (field, table) in self.one_hot_tables.iter_mut().enumerate() {
            table.accumulate_grad(&cache.one_hots[field], &d_mods[3 + field])?;
        }

        let d_ctx = self.ctx_act.backward(&d_ctx)?;
        let d_ctx = self.ctx_bn.backward(&d_ctx)?;
        let _ = self.ctx_proj.backward(&d_ctx)?;

        // The user expression is the sum of the embedding and the profile
        // projection, and the attention conditions on the raw embedding.
        self.user_emb.accumulate_grad(&cache.user_indices, &d_user)?;
        self.user_emb.accumulate_grad(&cache.user_indices, &d_att_user)?;
        let d_prof = self.profile_act.backward(&d_user)?;
        let _ = self.profile_proj.backward(&d_prof)?;

        Ok(())
    }

    /// One training step on an extracted batch: forward, backward,
    /// regularizer gradients, optimizer update. Returns the objective
    /// decomposition measured before the update.
    pub fn train_step(&mut self, batch: &BatchFeatures) -> ModelResult<LossBreakdown> {
        batch.check_schema(&self.schema())?;
        let (probs, aux) = self.forward_train(batch)?;
        let breakdown = LossBreakdown {
            cross_entropy: Metric::LogLoss.mean_score(&batch.labels, &probs, None),
            embedding_l2: self.embedding_l2(),
            attention_l2: self.attention_l2(),
            auxiliary: aux as f64,
        };
        self.backward(&batch.labels)?;
        self.apply_regularization();
        self.apply_updates();
        self.global_step += 1;
        Ok(breakdown)
    }

    /// The objective decomposition for a batch, without a parameter update.
    ///
    /// Runs the training-mode forward pass, so it consumes dropout
    /// randomness and moves the batch-norm statistics exactly like a
    /// training step would.
    pub fn loss_components(&mut self, batch: &BatchFeatures) -> ModelResult<LossBreakdown> {
        batch.check_schema(&self.schema())?;
        let (probs, aux) = self.forward_train(batch)?;
        self.cache = None;
        Ok(LossBreakdown {
            cross_entropy: Metric::LogLoss.mean_score(&batch.labels, &probs, None),
            embedding_l2: self.embedding_l2(),
            attention_l2: self.attention_l2(),
            auxiliary: aux as f64,
        })
    }

    fn embedding_l2(&mut self) -> f64 {
        let reg = Regularizer::L2(self.config.reg);
        let mut sum = 0.0f64;
        self.visit_embedding_group(&mut |_: &str, p: &mut Tensor, _: &mut Option<Tensor>| {
            sum += reg.loss(p) as f64;
        });
        sum
    }

    fn attention_l2(&mut self) -> f64 {
        let reg = Regularizer::L2(self.config.att_reg);
        let mut sum = 0.0f64;
        self.visit_attention_group(&mut |_: &str, p: &mut Tensor, _: &mut Option<Tensor>| {
            sum += reg.loss(p) as f64;
        });
        sum
    }

    /// Adds each group's L2 gradient into the parameter gradient slots,
    /// one reduction per group.
    fn apply_regularization(&mut self) {
        fn add_l2(reg: Regularizer) -> impl FnMut(&str, &mut Tensor, &mut Option<Tensor>) {
            move |_: &str, param: &mut Tensor, grad: &mut Option<Tensor>| {
                if let Some(g) = reg.grad(param) {
                    match grad {
                        Some(t) => t.add_assign(&g),
                        None => *grad = Some(g),
                    }
                }
            }
        }
        if self.config.reg != 0.0 {
            self.visit_embedding_group(&mut add_l2(Regularizer::L2(self.config.reg)));
        }
        if self.config.att_reg != 0.0 {
            self.visit_attention_group(&mut add_l2(Regularizer::L2(self.config.att_reg)));
        }
    }

    /// Consumes every pending gradient through its per-parameter optimizer.
    fn apply_updates(&mut self) {
        let mut optimizers = std::mem::take(&mut self.optimizers);
        let config = self.optimizer_config.clone();
        self.visit_all_params(&mut |name: &str, param: &mut Tensor, grad: &mut Option<Tensor>| {
            if let Some(g) = grad.take() {
                let optimizer = optimizers
                    .entry(name.to_string())
                    .or_insert_with(|| create_optimizer(config.clone()));
                optimizer.apply_gradients(param.data_mut(), g.data());
            }
        });
        self.optimizers = optimizers;
    }

    /// Sets the training-path dropout rates.
    pub fn set_dropout(&mut self, deep: f32, emb: f32) {
        for dropout in self
            .deep_dropouts
            .iter_mut()
            .chain(self.head_dropouts.iter_mut())
        {
            dropout.set_rate(deep);
        }
        self.cf_dropout.set_rate(emb);
        self.ctx_user_dropout.set_rate(emb);
        self.ctx_item_dropout.set_rate(emb);
    }

    /// Embedding/bias parameter group, L2-regularized at `reg`.
    fn visit_embedding_group(&mut self, v: &mut dyn ParamVisitor) {
        self.user_emb.visit_params("user_emb", v);
        self.word_emb.visit_params("word_emb", v);
        self.ctx_proj.visit_params("ctx_proj", v);
        self.profile_proj.visit_params("profile_proj", v);
        self.lda_proj.visit_params("lda_proj", v);
        self.user_bias.visit_params("user_bias", v);
        for (i, table) in self.one_hot_tables.iter_mut().enumerate() {
            table.visit_params(&format!("one_hot_{i}"), v);
        }
    }

    /// Attention parameter group, L2-regularized at `att_reg`.
    fn visit_attention_group(&mut self, v: &mut dyn ParamVisitor) {
        self.fusion.visit_params("fusion", v);
    }

    /// Every other trainable parameter.
    fn visit_free_group(&mut self, v: &mut dyn ParamVisitor) {
        self.visual_encoder.visit_params("vae", v);
        self.ctx_bn.visit_params("ctx_bn", v);
        self.visual_bn.visit_params("visual_bn", v);
        if let Some(bn) = self.deep_bn.as_mut() {
            bn.visit_params("deep_bn", v);
        }
        for (i, layer) in self.deep_layers.iter_mut().enumerate() {
            layer.visit_params(&format!("deep_{i}"), v);
        }
        for (i, table) in self.deep_one_hot_tables.iter_mut().enumerate() {
            table.visit_params(&format!("deep_one_hot_{i}"), v);
        }
        for (i, layer) in self.head_layers.iter_mut().enumerate() {
            layer.visit_params(&format!("head_{i}"), v);
        }
        self.head_out.visit_params("head_out", v);
    }

    fn visit_all_params(&mut self, v: &mut dyn ParamVisitor) {
        self.visit_embedding_group(v);
        self.visit_attention_group(v);
        self.visit_free_group(v);
    }

    fn visit_buffers(&mut self, f: &mut dyn FnMut(&str, &mut Tensor)) {
        self.ctx_bn.visit_buffers("ctx_bn", f);
        self.visual_bn.visit_buffers("visual_bn", f);
        if let Some(bn) = self.deep_bn.as_mut() {
            bn.visit_buffers("deep_bn", f);
        }
    }

    /// Snapshots every parameter and batch-norm statistic.
    pub fn state(&mut self) -> ModelState {
        let mut state = ModelState::new(self.global_step);
        self.visit_all_params(&mut |name: &str, param: &mut Tensor, _: &mut Option<Tensor>| {
            state.insert_param(name, param.shape(), param.data().to_vec());
        });
        self.visit_buffers(&mut |name: &str, buffer: &mut Tensor| {
            state.insert_buffer(name, buffer.shape(), buffer.data().to_vec());
        });
        state
            .metadata
            .insert("optimizer".to_string(), self.config.optimizer.clone());
        state
    }

    /// Restores every parameter and batch-norm statistic from a snapshot.
    ///
    /// Optimizer state is rebuilt from scratch on the next training step.
    pub fn load_state(&mut self, state: &ModelState) -> ModelResult<()> {
        let mut problems: Vec<String> = Vec::new();
        self.visit_all_params(&mut |name: &str, param: &mut Tensor, _: &mut Option<Tensor>| {
            match state.param(name) {
                Some(t) if t.shape.as_slice() == param.shape() => {
                    *param = Tensor::from_data(&t.shape, t.data.clone());
                }
                Some(t) => problems.push(format!(
                    "{name}: stored shape {:?} does not match {:?}",
                    t.shape,
                    param.shape()
                )),
                None => problems.push(format!("{name}: missing from state")),
            }
        });
        self.visit_buffers(&mut |name: &str, buffer: &mut Tensor| match state.buffer(name) {
            Some(t) if t.shape.as_slice() == buffer.shape() => {
                *buffer = Tensor::from_data(&t.shape, t.data.clone());
            }
            Some(t) => problems.push(format!(
                "{name}: stored shape {:?} does not match {:?}",
                t.shape,
                buffer.shape()
            )),
            None => problems.push(format!("{name}: missing from state")),
        });
        if !problems.is_empty() {
            return Err(ModelError::InvalidState(problems.join("; ")));
        }
        self.global_step = state.global_step;
        self.optimizers.clear();
        self.cache = None;
        Ok(())
    }

    /// Saves a checkpoint at `path`; a `.json` extension selects the JSON
    /// codec, anything else the binary codec.
    pub fn save(&mut self, path: &Path) -> ModelResult<()> {
        let state = self.state();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            JsonCheckpointer::new().save(path, &state)?;
        } else {
            BinaryCheckpointer::new().save(path, &state)?;
        }
        Ok(())
    }

    /// Loads a checkpoint from a file, or the latest checkpoint when
    /// `path` is a directory.
    pub fn load(&mut self, path: &Path) -> ModelResult<()> {
        let file = if path.is_dir() {
            BinaryCheckpointer::new()
                .latest(path)
                .or_else(|| JsonCheckpointer::new().latest(path))
                .ok_or_else(|| ModelError::NoCheckpoint(path.to_path_buf()))?
        } else if path.exists() {
            path.to_path_buf()
        } else {
            return Err(ModelError::NoCheckpoint(path.to_path_buf()));
        };
        let state = if file.extension().and_then(|e| e.to_str()) == Some("json") {
            JsonCheckpointer::new().restore(&file)?
        } else {
            BinaryCheckpointer::new().restore(&file)?
        };
        self.load_state(&state)
    }

    /// Saves a step-stamped checkpoint under the configured
    /// `checkpoint_path` directory.
    pub fn save_checkpoint(&mut self) -> ModelResult<PathBuf> {
        let base = self.config.checkpoint_path.clone().ok_or_else(|| {
            ModelError::Config("no checkpoint_path configured".to_string())
        })?;
        let path = Path::new(&base).join(BinaryCheckpointer::filename(self.global_step));
        self.save(&path)?;
        Ok(path)
    }
}

impl TrainableModel for FusionModel {
    type Batch = BatchFeatures;

    fn input_columns(&self) -> &'static [&'static str] {
        &[
            "user_indices",
            "words",
            "visual",
            "topics",
            "one_hots",
            "context",
            "face_stats",
        ]
    }

    fn target_column(&self) -> &'static str {
        "click"
    }

    fn extract_batch(&self, view: &TableView<'_>) -> ModelResult<BatchFeatures> {
        BatchFeatures::from_view(view, self.config.num_words)
    }

    fn predict_on_batch(&mut self, batch: &BatchFeatures) -> ModelResult<Vec<f32>> {
        self.predict(batch)
    }

    fn loss_on_batch(
        &mut self,
        batch: &BatchFeatures,
        class_weights: Option<&ClassWeights>,
    ) -> ModelResult<f64> {
        let (probs, logits) = self.infer(batch)?;
        let values = match self.metric {
            Metric::LogLossWithLogits => &logits,
            _ => &probs,
        };
        let weights = class_weights.map(|w| w.sample_weights(&batch.labels));
        Ok(self
            .metric
            .mean_score(&batch.labels, values, weights.as_deref()))
    }

    fn train_on_batch(&mut self, view: &TableView<'_>, sub_batches: usize) -> ModelResult<f64> {
        let mut total = 0.0;
        for sub in view.array_split(sub_batches.max(1)) {
            if sub.is_empty() {
                continue;
            }
            let batch = self.extract_batch(&sub)?;
            total += self.train_step(&batch)?.total();
        }
        Ok(total)
    }

    fn set_dropout_rates(&mut self, deep: f32, emb: f32) {
        self.set_dropout(deep, emb);
    }
}
