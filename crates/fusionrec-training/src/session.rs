//! The training/evaluation loop.
//!
//! `TrainSession` owns the mutable loop state the model itself stays free
//! of: loss histories, the per-chunk evaluation caches, and the
//! best-checkpoint tracking. It drives any [`TrainableModel`]
//! implementation one batch at a time; execution is strictly sequential.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fusionrec_data::Table;

use crate::contract::TrainableModel;
use crate::error::{ModelError, ModelResult};
use crate::metrics::{roc_auc, EvalRecord};

/// Options for [`TrainSession::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    /// Rows per mini-batch.
    pub batch_size: usize,
    /// Number of passes over the training table.
    pub epochs: usize,
    /// Epochs below this index are skipped.
    pub initial_epoch: usize,
    /// Whether to reshuffle the training table each epoch.
    pub shuffle: bool,
    /// Base seed for the per-epoch shuffles.
    pub shuffle_seed: u64,
    /// Evaluate and log every this many steps within an epoch.
    pub min_display: usize,
    /// Hard stop after this many mini-batches across all epochs.
    pub max_iter: Option<usize>,
    /// Sub-batches per mini-batch; each takes its own optimizer step.
    pub sub_batches: usize,
    /// Number of chunks the evaluation splits are divided into.
    pub eval_chunks: usize,
    /// Drop rate for the deep tower and scoring head during training.
    pub dropout_deep: f32,
    /// Drop rate for the interaction terms during training.
    pub dropout_emb: f32,
    /// Directory the best-epoch prediction artifact is written into.
    pub save_path: Option<PathBuf>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            epochs: 50,
            initial_epoch: 0,
            shuffle: true,
            shuffle_seed: 1024,
            min_display: 50,
            max_iter: None,
            sub_batches: 1,
            eval_chunks: 40,
            dropout_deep: 0.5,
            dropout_emb: 0.5,
            save_path: None,
        }
    }
}

/// One row of the prediction artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// External user id.
    pub user_id: i64,
    /// External item id.
    pub item_id: i64,
    /// Predicted click probability.
    pub prob: f32,
}

/// Filename of the prediction artifact inside `save_path`.
pub const PREDICTIONS_FILE: &str = "predictions.json";

/// Drives training and evaluation for one model.
pub struct TrainSession<M: TrainableModel> {
    model: M,
    /// Training losses at each display checkpoint.
    pub tr_loss_list: Vec<f64>,
    /// Validation losses (negative AUC) at each display checkpoint.
    pub val_loss_list: Vec<f64>,
    /// One record per display checkpoint.
    pub history: Vec<EvalRecord>,
    best_loss: f64,
    best_predictions: Option<Vec<Prediction>>,
    val_cache: HashMap<usize, M::Batch>,
    test_cache: HashMap<usize, M::Batch>,
}

impl<M: TrainableModel> TrainSession<M> {
    /// Creates a session around a freshly built model.
    pub fn new(model: M) -> Self {
        Self {
            model,
            tr_loss_list: Vec::new(),
            val_loss_list: Vec::new(),
            history: Vec::new(),
            best_loss: f64::INFINITY,
            best_predictions: None,
            val_cache: HashMap::new(),
            test_cache: HashMap::new(),
        }
    }

    /// The wrapped model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The wrapped model, mutably.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Consumes the session, returning the model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Best validation loss (negative AUC) seen so far.
    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }

    /// Test-split predictions from the best validation checkpoint.
    pub fn best_predictions(&self) -> Option<&[Prediction]> {
        self.best_predictions.as_deref()
    }

    /// Fits the model on `train`, evaluating on `validation` every
    /// `min_display` steps and predicting `test` whenever the validation
    /// score improves. The best predictions are written to
    /// `options.save_path` after each epoch.
    pub fn fit(
        &mut self,
        train: &Table,
        validation: Option<&Table>,
        test: Option<&Table>,
        options: &FitOptions,
    ) -> ModelResult<()> {
        if train.is_empty() {
            return Err(ModelError::Config("training table is empty".to_string()));
        }
        self.model
            .set_dropout_rates(options.dropout_deep, options.dropout_emb);

        let n = train.len();
        let iters = (n - 1) / options.batch_size + 1;
        info!(
            steps_per_epoch = iters,
            batch_size = options.batch_size,
            epochs = options.epochs,
            "starting training"
        );
        let start = Instant::now();
        self.best_loss = f64::INFINITY;
        self.best_predictions = None;
        let mut stop = false;

        for epoch in options.initial_epoch..options.epochs {
            let shuffled;
            let data: &Table = if options.shuffle {
                shuffled = train.shuffled(options.shuffle_seed.wrapping_add(epoch as u64));
                &shuffled
            } else {
                train
            };

            for step in 0..iters {
                let end = ((step + 1) * options.batch_size).min(n);
                let view = data.slice(step * options.batch_size, end);
                let tr_loss = self.model.train_on_batch(&view, options.sub_batches)?;

                if step % options.min_display == 0 {
                    self.tr_loss_list.push(tr_loss);
                    let record = EvalRecord::new(tr_loss, (epoch * iters + step) as u64);
                    let elapsed = start.elapsed().as_secs_f64();
                    match validation {
                        Some(val) => {
                            let val_loss = self.evaluate(val, options.eval_chunks)?;
                            self.val_loss_list.push(val_loss);
                            self.history.push(record.with_auc(-val_loss));
                            info!(epoch, step, tr_loss, val_loss, elapsed, "training progress");
                            if val_loss < self.best_loss {
                                self.best_loss = val_loss;
                                if let Some(test) = test {
                                    self.best_predictions =
                                        Some(self.predict_table(test, options.eval_chunks)?);
                                }
                            }
                        }
                        None => {
                            self.history.push(record);
                            info!(epoch, step, tr_loss, elapsed, "training progress");
                        }
                    }
                }
                if options.max_iter == Some(epoch * iters + step) {
                    stop = true;
                    break;
                }
            }

            if let (Some(dir), Some(preds)) = (&options.save_path, &self.best_predictions) {
                write_predictions(dir, preds)?;
            }
            if stop {
                break;
            }
        }
        Ok(())
    }

    /// Evaluates the model on a static table and returns the **negative**
    /// ranking AUC, so lower is better like a loss.
    ///
    /// The table is split into `chunks` pieces; each chunk's extracted
    /// features are cached by chunk index and reused on every later call.
    pub fn evaluate(&mut self, table: &Table, chunks: usize) -> ModelResult<f64> {
        let mut labels = Vec::with_capacity(table.len());
        let mut probs = Vec::with_capacity(table.len());
        for (index, view) in table.array_split(chunks).into_iter().enumerate() {
            if view.is_empty() {
                continue;
            }
            if !self.val_cache.contains_key(&index) {
                debug!(chunk = index, rows = view.len(), "extracting validation chunk");
                self.val_cache
                    .insert(index, self.model.extract_batch(&view)?);
            }
            let batch = &self.val_cache[&index];
            probs.extend(self.model.predict_on_batch(batch)?);
            labels.extend_from_slice(view.clicks());
        }
        Ok(-roc_auc(&labels, &probs))
    }

    /// Predicts probabilities for a static table, with its own per-chunk
    /// cache.
    pub fn predict_proba(&mut self, table: &Table, chunks: usize) -> ModelResult<Vec<f32>> {
        let mut probs = Vec::with_capacity(table.len());
        for (index, view) in table.array_split(chunks).into_iter().enumerate() {
            if view.is_empty() {
                continue;
            }
            if !self.test_cache.contains_key(&index) {
                debug!(chunk = index, rows = view.len(), "extracting test chunk");
                self.test_cache
                    .insert(index, self.model.extract_batch(&view)?);
            }
            let batch = &self.test_cache[&index];
            probs.extend(self.model.predict_on_batch(batch)?);
        }
        Ok(probs)
    }

    fn predict_table(&mut self, table: &Table, chunks: usize) -> ModelResult<Vec<Prediction>> {
        let probs = self.predict_proba(table, chunks)?;
        let view = table.view();
        Ok(view
            .user_ids()
            .iter()
            .zip(view.item_ids().iter())
            .zip(probs)
            .map(|((&user_id, &item_id), prob)| Prediction {
                user_id,
                item_id,
                prob,
            })
            .collect())
    }

    /// Number of cached evaluation chunks (validation, test).
    pub fn cache_sizes(&self) -> (usize, usize) {
        (self.val_cache.len(), self.test_cache.len())
    }
}

/// Writes the prediction artifact as JSON into `dir`.
pub fn write_predictions(dir: &Path, predictions: &[Prediction]) -> ModelResult<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| ModelError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let path = dir.join(PREDICTIONS_FILE);
    let json = serde_json::to_string(predictions)?;
    std::fs::write(&path, json).map_err(|e| ModelError::Io {
        path: path.clone(),
        source: e,
    })?;
    info!(path = %path.display(), rows = predictions.len(), "predictions saved");
    Ok(path)
}

/// Reads a prediction artifact back.
pub fn read_predictions(path: &Path) -> ModelResult<Vec<Prediction>> {
    let json = std::fs::read_to_string(path).map_err(|e| ModelError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionrec_data::TableView;

    /// A stub model that ranks perfectly, for exercising the loop without
    /// the full fusion graph.
    struct StubModel {
        extract_calls: std::cell::Cell<usize>,
        train_calls: usize,
    }

    impl StubModel {
        fn new() -> Self {
            Self {
                extract_calls: std::cell::Cell::new(0),
                train_calls: 0,
            }
        }
    }

    impl TrainableModel for StubModel {
        type Batch = Vec<f32>;

        fn input_columns(&self) -> &'static [&'static str] {
            &["user_indices"]
        }

        fn target_column(&self) -> &'static str {
            "click"
        }

        fn extract_batch(&self, view: &TableView<'_>) -> ModelResult<Vec<f32>> {
            self.extract_calls.set(self.extract_calls.get() + 1);
            Ok(view.clicks().to_vec())
        }

        fn predict_on_batch(&mut self, batch: &Vec<f32>) -> ModelResult<Vec<f32>> {
            // A perfect ranker: predict the label itself, slightly damped.
            Ok(batch.iter().map(|&y| 0.1 + 0.8 * y).collect())
        }

        fn loss_on_batch(
            &mut self,
            batch: &Vec<f32>,
            _class_weights: Option<&crate::contract::ClassWeights>,
        ) -> ModelResult<f64> {
            Ok(batch.len() as f64)
        }

        fn train_on_batch(
            &mut self,
            view: &TableView<'_>,
            _sub_batches: usize,
        ) -> ModelResult<f64> {
            self.train_calls += 1;
            Ok(view.len() as f64)
        }
    }

    fn table(n: usize) -> Table {
        fusionrec_data::SyntheticConfig {
            num_samples: n,
            ..fusionrec_data::SyntheticConfig::small(5)
        }
        .generate()
        .unwrap()
    }

    #[test]
    fn test_evaluate_returns_negative_auc_and_caches() {
        let table = table(40);
        let mut session = TrainSession::new(StubModel::new());

        let loss = session.evaluate(&table, 4).unwrap();
        // A perfect ranker scores AUC 1, reported as -1.
        assert!((loss + 1.0).abs() < 1e-9);
        assert_eq!(session.cache_sizes(), (4, 0));

        // Re-entry hits the cache and reproduces the score without
        // extracting anything again.
        let again = session.evaluate(&table, 4).unwrap();
        assert_eq!(loss, again);
        assert_eq!(session.cache_sizes(), (4, 0));
        assert_eq!(session.model().extract_calls.get(), 4);
    }

    #[test]
    fn test_more_chunks_than_rows_skips_empty() {
        let table = table(3);
        let mut session = TrainSession::new(StubModel::new());
        let probs = session.predict_proba(&table, 8).unwrap();
        assert_eq!(probs.len(), 3);
        // Only non-empty chunks are cached.
        assert_eq!(session.cache_sizes(), (0, 3));
    }

    #[test]
    fn test_fit_steps_and_max_iter() {
        let table = table(64);
        let mut session = TrainSession::new(StubModel::new());
        let options = FitOptions {
            batch_size: 16,
            epochs: 3,
            min_display: 100,
            max_iter: Some(5),
            shuffle: false,
            ..FitOptions::default()
        };
        session.fit(&table, None, None, &options).unwrap();
        // 4 steps per epoch; iteration index 5 is the second step of the
        // second epoch.
        assert_eq!(session.model().train_calls, 6);
    }

    #[test]
    fn test_fit_tracks_best_and_writes_artifact() {
        let table = table(32);
        let dir = tempfile::tempdir().unwrap();
        let mut session = TrainSession::new(StubModel::new());
        let options = FitOptions {
            batch_size: 16,
            epochs: 1,
            min_display: 1,
            eval_chunks: 2,
            shuffle: false,
            save_path: Some(dir.path().to_path_buf()),
            ..FitOptions::default()
        };
        session.fit(&table, Some(&table), Some(&table), &options).unwrap();

        assert!(session.best_loss() < 0.0);
        let preds = session.best_predictions().unwrap();
        assert_eq!(preds.len(), 32);

        let written = read_predictions(&dir.path().join(PREDICTIONS_FILE)).unwrap();
        assert_eq!(written.len(), 32);
        assert_eq!(written[0], preds[0]);
        assert!(!session.tr_loss_list.is_empty());
        assert_eq!(session.tr_loss_list.len(), session.val_loss_list.len());
        assert_eq!(session.history.len(), session.tr_loss_list.len());
        assert!(session.history.iter().all(|r| r.auc.is_some()));
    }

    #[test]
    fn test_fit_rejects_empty_table() {
        let empty = Table::from_samples(
            *table(1).schema(),
            Vec::new(),
        )
        .unwrap();
        let mut session = TrainSession::new(StubModel::new());
        assert!(session
            .fit(&empty, None, None, &FitOptions::default())
            .is_err());
    }
}
