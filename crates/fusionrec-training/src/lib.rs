//! Attention-fusion recommender model and training loop.
//!
//! The crate ties the workspace together: [`FusionModel`] assembles the
//! layers from `fusionrec-layers` into the attention-weighted multi-modal
//! click model, and [`TrainSession`] drives any [`TrainableModel`] through
//! batched training, cached evaluation, and AUC-based model selection.
//!
//! ```no_run
//! use fusionrec_data::SyntheticConfig;
//! use fusionrec_layers::Tensor;
//! use fusionrec_training::{FitOptions, FusionModel, FusionModelConfig, TrainSession};
//!
//! fn main() -> fusionrec_training::ModelResult<()> {
//!     let table = SyntheticConfig::small(1024).generate()?;
//!     let config = FusionModelConfig::default();
//!     let profiles = Tensor::zeros(&[config.num_users, config.profile_dim]);
//!     let model = FusionModel::new(config, profiles)?;
//!
//!     let mut session = TrainSession::new(model);
//!     session.fit(&table, Some(&table), None, &FitOptions::default())?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod contract;
pub mod error;
pub mod features;
pub mod metrics;
pub mod model;
pub mod session;

pub use contract::{ClassWeights, TrainableModel};
pub use error::{ModelError, ModelResult};
pub use features::BatchFeatures;
pub use metrics::{roc_auc, EvalRecord, Metric};
pub use model::{FusionModel, FusionModelConfig, LossBreakdown};
pub use session::{
    read_predictions, write_predictions, FitOptions, Prediction, TrainSession, PREDICTIONS_FILE,
};
