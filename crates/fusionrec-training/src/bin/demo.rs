//! End-to-end training demo on a synthetic click table.
//!
//! Generates deterministic train/validation/test splits, fits the fusion
//! model with periodic validation, and writes the best-epoch prediction
//! artifact plus a final checkpoint under `--model-dir`.
//!
//! Run with:
//! ```bash
//! cargo run --bin fusionrec-demo -- --model-dir /tmp/fusionrec-demo --epochs 3
//! ```

use std::path::PathBuf;

use clap::Parser;
use fusionrec_data::SyntheticConfig;
use fusionrec_layers::Initializer;
use fusionrec_training::{FitOptions, FusionModel, FusionModelConfig, TrainSession};

#[derive(Parser, Debug)]
struct Args {
    /// Where to write the prediction artifact and checkpoint.
    #[arg(long, default_value = "/tmp/fusionrec_demo_model")]
    model_dir: PathBuf,

    /// Passes over the training table.
    #[arg(long, default_value_t = 3)]
    epochs: usize,

    /// Rows per mini-batch.
    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Rows in the generated training table.
    #[arg(long, default_value_t = 512)]
    samples: usize,

    /// Seed for data generation and model initialization.
    #[arg(long, default_value_t = 1024)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let synth = SyntheticConfig {
        num_samples: args.samples,
        ..SyntheticConfig::small(args.seed)
    };
    let train = synth.generate()?;
    let validation = SyntheticConfig {
        num_samples: args.samples / 4,
        ..SyntheticConfig::small(args.seed.wrapping_add(1))
    }
    .generate()?;
    let test = SyntheticConfig {
        num_samples: args.samples / 4,
        ..SyntheticConfig::small(args.seed.wrapping_add(2))
    }
    .generate()?;

    let config = FusionModelConfig {
        num_users: synth.num_users,
        num_words: synth.num_words,
        one_hot_dims: synth.one_hot_dims.clone(),
        dim_k: 16,
        att_dim_k: 8,
        dim_lda: synth.topic_dim,
        visual_dim: synth.visual_dim,
        context_dim: synth.context_dim,
        face_dim: synth.face_dim,
        profile_dim: 8,
        deep_dims: vec![32, 16],
        head_dims: vec![16],
        vae_hidden_dim: 16,
        seed: args.seed,
        ..FusionModelConfig::default()
    };
    let profiles = Initializer::GlorotUniform {
        seed: args.seed.wrapping_add(7),
    }
    .initialize(&[config.num_users, config.profile_dim]);
    let model = FusionModel::new(config, profiles)?;

    let options = FitOptions {
        batch_size: args.batch_size,
        epochs: args.epochs,
        min_display: 4,
        eval_chunks: 4,
        dropout_deep: 0.2,
        dropout_emb: 0.2,
        save_path: Some(args.model_dir.clone()),
        ..FitOptions::default()
    };

    let mut session = TrainSession::new(model);
    session.fit(&train, Some(&validation), Some(&test), &options)?;

    let best_auc = -session.best_loss();
    tracing::info!(best_auc, "training finished");

    let checkpoint = args.model_dir.join("checkpoint-final.bin");
    session.model_mut().save(&checkpoint)?;
    tracing::info!(path = %checkpoint.display(), "final checkpoint saved");
    Ok(())
}
