//! Deterministic synthetic tables for tests and the demo binary.

use serde::{Deserialize, Serialize};

use crate::table::{Sample, Table, TableSchema};
use crate::DataResult;

/// Shape of a generated table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Number of rows to generate.
    pub num_samples: usize,
    /// User vocabulary size.
    pub num_users: usize,
    /// Word vocabulary size.
    pub num_words: usize,
    /// Maximum words per item.
    pub max_words: usize,
    /// Visual feature width.
    pub visual_dim: usize,
    /// Topic vector width.
    pub topic_dim: usize,
    /// Context vector width.
    pub context_dim: usize,
    /// Face statistics width.
    pub face_dim: usize,
    /// Cardinality of each categorical field.
    pub one_hot_dims: Vec<usize>,
    /// Seed for the generator.
    pub seed: u64,
}

impl SyntheticConfig {
    /// A small table good enough to exercise every code path.
    pub fn small(seed: u64) -> Self {
        Self {
            num_samples: 64,
            num_users: 8,
            num_words: 32,
            max_words: 4,
            visual_dim: 12,
            topic_dim: 4,
            context_dim: 6,
            face_dim: 3,
            one_hot_dims: vec![3, 5],
            seed,
        }
    }

    /// The schema of tables this configuration generates.
    pub fn schema(&self) -> TableSchema {
        TableSchema {
            visual_dim: self.visual_dim,
            topic_dim: self.topic_dim,
            context_dim: self.context_dim,
            face_dim: self.face_dim,
            one_hot_fields: self.one_hot_dims.len(),
        }
    }

    /// Generates the table. The click label carries a planted signal (the
    /// sign of the first context feature plus a user-specific lean) so a
    /// trained model can beat chance on held-out rows.
    pub fn generate(&self) -> DataResult<Table> {
        let mut state = self.seed;
        let mut next_f32 = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 40) & 0xffffff) as f32 / 16777216.0
        };

        let mut samples = Vec::with_capacity(self.num_samples);
        for i in 0..self.num_samples {
            let user_index = (next_f32() * self.num_users as f32) as usize % self.num_users;
            let num_item_words = (next_f32() * (self.max_words + 1) as f32) as usize;
            let words = (0..num_item_words)
                .map(|_| (next_f32() * self.num_words as f32) as usize % self.num_words)
                .collect();
            let visual: Vec<f32> = (0..self.visual_dim).map(|_| next_f32() - 0.5).collect();
            let topics: Vec<f32> = (0..self.topic_dim).map(|_| next_f32()).collect();
            let context: Vec<f32> = (0..self.context_dim).map(|_| next_f32() - 0.5).collect();
            let face_stats: Vec<f32> = (0..self.face_dim).map(|_| next_f32()).collect();
            let one_hots: Vec<usize> = self
                .one_hot_dims
                .iter()
                .map(|&dim| (next_f32() * dim as f32) as usize % dim)
                .collect();

            let lean = if user_index % 2 == 0 { 0.2 } else { -0.2 };
            let click = if context[0] + lean + 0.1 * (next_f32() - 0.5) > 0.0 {
                1.0
            } else {
                0.0
            };

            samples.push(Sample {
                user_id: 1000 + user_index as i64,
                item_id: 5000 + i as i64,
                user_index,
                click,
                words,
                visual,
                topics,
                one_hots,
                context,
                face_stats,
            });
        }
        Table::from_samples(self.schema(), samples)
    }
}
