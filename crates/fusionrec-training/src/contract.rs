//! The trainable-model contract the session drives.

use fusionrec_data::TableView;

use crate::error::ModelResult;

/// Per-class loss weights for binary labels.
///
/// Expands to one weight per sample on the loss-evaluation path; an absent
/// `ClassWeights` means unit weights everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassWeights {
    /// Weight applied to label-0 samples.
    pub negative: f32,
    /// Weight applied to label-1 samples.
    pub positive: f32,
}

impl ClassWeights {
    /// One weight per label.
    pub fn sample_weights(&self, labels: &[f32]) -> Vec<f32> {
        labels
            .iter()
            .map(|&y| if y > 0.5 { self.positive } else { self.negative })
            .collect()
    }
}

/// A model the [`crate::session::TrainSession`] can fit and evaluate.
///
/// The contract separates feature extraction from computation so the
/// session can cache extracted batches per evaluation chunk: `extract_batch`
/// turns a table view into the model's batch representation once, and
/// `predict_on_batch`/`loss_on_batch` consume it any number of times.
pub trait TrainableModel {
    /// Extracted feature bundle for one batch.
    type Batch;

    /// Names of the table columns the model consumes.
    fn input_columns(&self) -> &'static [&'static str];

    /// Name of the label column.
    fn target_column(&self) -> &'static str;

    /// Extracts the model's batch representation from a table view.
    fn extract_batch(&self, view: &TableView<'_>) -> ModelResult<Self::Batch>;

    /// Predicted probabilities in inference mode (dropout disabled,
    /// normalization on frozen statistics).
    fn predict_on_batch(&mut self, batch: &Self::Batch) -> ModelResult<Vec<f32>>;

    /// Mean per-sample objective on the batch without a parameter update.
    fn loss_on_batch(
        &mut self,
        batch: &Self::Batch,
        class_weights: Option<&ClassWeights>,
    ) -> ModelResult<f64>;

    /// Runs forward, backward, and one optimizer step per sub-batch.
    ///
    /// Sub-batches are independent optimizer updates, not gradient
    /// accumulation. Returns the summed training loss across sub-batches.
    fn train_on_batch(&mut self, view: &TableView<'_>, sub_batches: usize) -> ModelResult<f64>;

    /// Sets the dropout rates the training path uses. Inference paths are
    /// unaffected. The default implementation ignores the rates.
    fn set_dropout_rates(&mut self, _deep: f32, _emb: f32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_weight_expansion() {
        let weights = ClassWeights {
            negative: 0.5,
            positive: 2.0,
        };
        let expanded = weights.sample_weights(&[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(expanded, vec![2.0, 0.5, 0.5, 2.0]);
    }
}
