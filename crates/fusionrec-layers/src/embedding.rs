//! Index-based embedding tables.

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, LayerResult};
use crate::initializer::Initializer;
use crate::layer::ParamVisitor;
use crate::tensor::Tensor;

/// A dense embedding table of shape `[rows, dim]` looked up by row index.
///
/// Gradients are scatter-added into a table-shaped gradient tensor so the
/// optimizer can treat the table like any other parameter.
///
/// # Example
///
/// ```
/// use fusionrec_layers::embedding::EmbeddingTable;
///
/// let table = EmbeddingTable::new(100, 16, 7);
/// let vectors = table.lookup(&[3, 41, 3]).unwrap();
/// assert_eq!(vectors.shape(), &[3, 16]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingTable {
    weights: Tensor,
    rows: usize,
    dim: usize,
    grad: Option<Tensor>,
}

impl EmbeddingTable {
    /// Creates a table with Glorot-uniform rows.
    pub fn new(rows: usize, dim: usize, seed: u64) -> Self {
        Self::with_initializer(rows, dim, Initializer::GlorotUniform { seed })
    }

    /// Creates a table with all-zero rows (bias tables).
    pub fn zeros(rows: usize, dim: usize) -> Self {
        Self::with_initializer(rows, dim, Initializer::Zeros)
    }

    /// Creates a table with an explicit initializer.
    pub fn with_initializer(rows: usize, dim: usize, init: Initializer) -> Self {
        Self {
            weights: init.initialize(&[rows, dim]),
            rows,
            dim,
            grad: None,
        }
    }

    /// Wraps an existing matrix as a (typically frozen) table.
    pub fn from_tensor(weights: Tensor) -> Self {
        assert_eq!(weights.ndim(), 2, "embedding table must be 2D");
        let rows = weights.shape()[0];
        let dim = weights.shape()[1];
        Self {
            weights,
            rows,
            dim,
            grad: None,
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The full weight matrix.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Gathers rows by index into a `[batch, dim]` tensor.
    pub fn lookup(&self, indices: &[usize]) -> LayerResult<Tensor> {
        let mut data = Vec::with_capacity(indices.len() * self.dim);
        for &idx in indices {
            if idx >= self.rows {
                return Err(LayerError::IndexOutOfRange {
                    index: idx,
                    rows: self.rows,
                });
            }
            data.extend_from_slice(&self.weights.data()[idx * self.dim..(idx + 1) * self.dim]);
        }
        Ok(Tensor::from_data(&[indices.len(), self.dim], data))
    }

    /// Scatter-adds `grad` (shape `[batch, dim]`) into the table gradient
    /// at the looked-up rows. Repeated indices accumulate.
    pub fn accumulate_grad(&mut self, indices: &[usize], grad: &Tensor) -> LayerResult<()> {
        if grad.shape() != [indices.len(), self.dim] {
            return Err(LayerError::ShapeMismatch {
                expected: vec![indices.len(), self.dim],
                actual: grad.shape().to_vec(),
            });
        }
        let table_grad = self
            .grad
            .get_or_insert_with(|| Tensor::zeros(&[self.rows, self.dim]));
        for (batch_row, &idx) in indices.iter().enumerate() {
            for j in 0..self.dim {
                table_grad.data_mut()[idx * self.dim + j] +=
                    grad.data()[batch_row * self.dim + j];
            }
        }
        Ok(())
    }

    /// Direct access to the table-shaped gradient slot (used for
    /// accumulating sparse bag-of-words products).
    pub fn grad_mut(&mut self) -> &mut Tensor {
        let (rows, dim) = (self.rows, self.dim);
        self.grad
            .get_or_insert_with(|| Tensor::zeros(&[rows, dim]))
    }

    /// Walks the table and its gradient slot.
    pub fn visit_params(&mut self, prefix: &str, visitor: &mut dyn ParamVisitor) {
        visitor.visit(&format!("{prefix}/weights"), &mut self.weights, &mut self.grad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_gathers_rows() {
        let mut table = EmbeddingTable::zeros(3, 2);
        table.weights = Tensor::from_data(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = table.lookup(&[2, 0]).unwrap();
        assert_eq!(out.data(), &[5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn test_lookup_out_of_range() {
        let table = EmbeddingTable::new(4, 8, 1);
        assert!(matches!(
            table.lookup(&[4]),
            Err(LayerError::IndexOutOfRange { index: 4, rows: 4 })
        ));
    }

    #[test]
    fn test_accumulate_grad_repeated_indices() {
        let mut table = EmbeddingTable::zeros(3, 2);
        let grad = Tensor::from_data(&[2, 2], vec![1.0, 1.0, 2.0, 2.0]);
        table.accumulate_grad(&[1, 1], &grad).unwrap();
        let g = table.grad.as_ref().unwrap();
        assert_eq!(&g.data()[2..4], &[3.0, 3.0]);
        assert_eq!(&g.data()[0..2], &[0.0, 0.0]);
    }

    #[test]
    fn test_accumulate_grad_shape_check() {
        let mut table = EmbeddingTable::zeros(3, 2);
        let grad = Tensor::zeros(&[2, 3]);
        assert!(table.accumulate_grad(&[0, 1], &grad).is_err());
    }
}
