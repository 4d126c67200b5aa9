//! Sparse indicator batches for variable-length word lists.

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, LayerResult};
use crate::tensor::Tensor;

/// A sparse COO bag-of-words batch: one indicator entry per (sample, word)
/// pair against an implicit dense shape of `[batch, vocab]`.
///
/// A batch where no sample has any word degrades to a single zero-valued
/// entry at (0, 0) so downstream products stay shape-valid and contribute
/// exactly nothing. This is deliberate: an all-empty batch is data, not an
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseBow {
    entries: Vec<(usize, usize)>,
    values: Vec<f32>,
    batch: usize,
    vocab: usize,
}

impl SparseBow {
    /// Builds the indicator batch from per-sample word-index lists.
    ///
    /// Every word index must be below `vocab`.
    pub fn from_word_lists(lists: &[Vec<usize>], vocab: usize) -> LayerResult<Self> {
        let mut entries = Vec::new();
        for (row, words) in lists.iter().enumerate() {
            for &word in words {
                if word >= vocab {
                    return Err(LayerError::IndexOutOfRange {
                        index: word,
                        rows: vocab,
                    });
                }
                entries.push((row, word));
            }
        }
        let values = if entries.is_empty() {
            entries.push((0, 0));
            vec![0.0]
        } else {
            vec![1.0; entries.len()]
        };
        Ok(Self {
            entries,
            values,
            batch: lists.len(),
            vocab,
        })
    }

    /// Number of samples in the batch.
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Vocabulary size (dense column count).
    pub fn vocab(&self) -> usize {
        self.vocab
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Sparse-dense product against a `[vocab, dim]` matrix, producing
    /// `[batch, dim]`.
    pub fn matmul(&self, dense: &Tensor) -> LayerResult<Tensor> {
        if dense.ndim() != 2 || dense.shape()[0] != self.vocab {
            return Err(LayerError::ShapeMismatch {
                expected: vec![self.vocab, 0],
                actual: dense.shape().to_vec(),
            });
        }
        let dim = dense.shape()[1];
        let mut out = vec![0.0; self.batch * dim];
        for ((row, word), &v) in self.entries.iter().zip(self.values.iter()) {
            if v == 0.0 {
                continue;
            }
            for j in 0..dim {
                out[row * dim + j] += v * dense.data()[word * dim + j];
            }
        }
        Ok(Tensor::from_data(&[self.batch, dim], out))
    }

    /// Accumulates the product gradient into a `[vocab, dim]` table
    /// gradient: `dW[word] += v * g[row]` for every stored entry.
    pub fn accumulate_table_grad(
        &self,
        out_grad: &Tensor,
        table_grad: &mut Tensor,
    ) -> LayerResult<()> {
        if out_grad.ndim() != 2 || out_grad.shape()[0] != self.batch {
            return Err(LayerError::ShapeMismatch {
                expected: vec![self.batch, 0],
                actual: out_grad.shape().to_vec(),
            });
        }
        let dim = out_grad.shape()[1];
        if table_grad.shape() != [self.vocab, dim] {
            return Err(LayerError::ShapeMismatch {
                expected: vec![self.vocab, dim],
                actual: table_grad.shape().to_vec(),
            });
        }
        for ((row, word), &v) in self.entries.iter().zip(self.values.iter()) {
            if v == 0.0 {
                continue;
            }
            for j in 0..dim {
                table_grad.data_mut()[word * dim + j] += v * out_grad.data()[row * dim + j];
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_sums_word_rows() {
        let lists = vec![vec![0, 2], vec![1]];
        let bow = SparseBow::from_word_lists(&lists, 3).unwrap();
        let table = Tensor::from_data(&[3, 2], vec![1.0, 2.0, 10.0, 20.0, 100.0, 200.0]);
        let out = bow.matmul(&table).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(out.data(), &[101.0, 202.0, 10.0, 20.0]);
    }

    #[test]
    fn test_empty_batch_degrades_to_zero_row() {
        let lists = vec![vec![], vec![]];
        let bow = SparseBow::from_word_lists(&lists, 5).unwrap();
        assert_eq!(bow.nnz(), 1);
        let table = Tensor::ones(&[5, 3]);
        let out = bow.matmul(&table).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert!(out.data().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_word_out_of_vocab_rejected() {
        let lists = vec![vec![7]];
        assert!(SparseBow::from_word_lists(&lists, 5).is_err());
    }

    #[test]
    fn test_table_grad_accumulation() {
        let lists = vec![vec![1], vec![1, 3]];
        let bow = SparseBow::from_word_lists(&lists, 4).unwrap();
        let out_grad = Tensor::from_data(&[2, 2], vec![1.0, 2.0, 10.0, 20.0]);
        let mut table_grad = Tensor::zeros(&[4, 2]);
        bow.accumulate_table_grad(&out_grad, &mut table_grad).unwrap();
        // Word 1 receives both rows, word 3 only the second.
        assert_eq!(&table_grad.data()[2..4], &[11.0, 22.0]);
        assert_eq!(&table_grad.data()[6..8], &[10.0, 20.0]);
    }
}
