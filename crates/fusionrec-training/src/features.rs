//! Batch feature extraction from table views.

use fusionrec_data::{TableSchema, TableView};
use fusionrec_layers::{SparseBow, Tensor};

use crate::error::{ModelError, ModelResult};

/// Extracted tensors for one batch: the unit the evaluation caches hold.
///
/// Built once per chunk from a [`TableView`] and reused across epochs; the
/// validation and test splits are assumed static.
#[derive(Debug, Clone)]
pub struct BatchFeatures {
    /// External user ids, carried to the prediction artifact.
    pub user_ids: Vec<i64>,
    /// External item ids, carried to the prediction artifact.
    pub item_ids: Vec<i64>,
    /// User embedding row indices.
    pub user_indices: Vec<usize>,
    /// Click labels in {0, 1}.
    pub labels: Vec<f32>,
    /// Sparse bag-of-words indicator batch.
    pub words: SparseBow,
    /// Raw visual features `[batch, visual_dim]`.
    pub visual: Tensor,
    /// Topic-model vectors `[batch, topic_dim]`.
    pub topics: Tensor,
    /// Numeric context features `[batch, context_dim]`.
    pub context: Tensor,
    /// Numeric face statistics `[batch, face_dim]`.
    pub face_stats: Tensor,
    /// Per-field categorical indices, one vector per one-hot field.
    pub one_hots: Vec<Vec<usize>>,
}

impl BatchFeatures {
    /// Extracts the batch from a view, validating word indices against the
    /// vocabulary.
    pub fn from_view(view: &TableView<'_>, num_words: usize) -> ModelResult<Self> {
        let schema = *view.schema();
        let batch = view.len();
        let words = SparseBow::from_word_lists(view.words(), num_words)?;
        let one_hots = (0..schema.one_hot_fields)
            .map(|field| view.one_hot_field(field))
            .collect();
        Ok(Self {
            user_ids: view.user_ids().to_vec(),
            item_ids: view.item_ids().to_vec(),
            user_indices: view.user_indices().to_vec(),
            labels: view.clicks().to_vec(),
            words,
            visual: Tensor::from_data(&[batch, schema.visual_dim], view.visual_flat().to_vec()),
            topics: Tensor::from_data(&[batch, schema.topic_dim], view.topics_flat().to_vec()),
            context: Tensor::from_data(&[batch, schema.context_dim], view.context_flat().to_vec()),
            face_stats: Tensor::from_data(&[batch, schema.face_dim], view.face_flat().to_vec()),
            one_hots,
        })
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch has no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Validates the batch against the model's expected widths.
    pub fn check_schema(&self, expected: &TableSchema) -> ModelResult<()> {
        let actual = TableSchema {
            visual_dim: self.visual.cols(),
            topic_dim: self.topics.cols(),
            context_dim: self.context.cols(),
            face_dim: self.face_stats.cols(),
            one_hot_fields: self.one_hots.len(),
        };
        if actual != *expected {
            return Err(ModelError::Config(format!(
                "batch schema {actual:?} does not match the model's {expected:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusionrec_data::SyntheticConfig;

    #[test]
    fn test_extraction_shapes() {
        let config = SyntheticConfig::small(3);
        let table = config.generate().unwrap();
        let view = table.slice(0, 10);
        let batch = BatchFeatures::from_view(&view, config.num_words).unwrap();

        assert_eq!(batch.len(), 10);
        assert_eq!(batch.visual.shape(), &[10, config.visual_dim]);
        assert_eq!(batch.topics.shape(), &[10, config.topic_dim]);
        assert_eq!(batch.one_hots.len(), config.one_hot_dims.len());
        assert_eq!(batch.one_hots[0].len(), 10);
        batch.check_schema(&config.schema()).unwrap();
    }

    #[test]
    fn test_word_out_of_vocab_rejected() {
        let config = SyntheticConfig::small(3);
        let table = config.generate().unwrap();
        let view = table.view();
        // A vocabulary smaller than the generated indices must fail.
        assert!(BatchFeatures::from_view(&view, 1).is_err());
    }

    #[test]
    fn test_schema_mismatch_detected() {
        let config = SyntheticConfig::small(3);
        let table = config.generate().unwrap();
        let batch = BatchFeatures::from_view(&table.view(), config.num_words).unwrap();

        let mut wrong = config.schema();
        wrong.context_dim += 1;
        assert!(batch.check_schema(&wrong).is_err());
    }
}
