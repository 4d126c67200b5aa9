//! Neural building blocks for the fusionrec recommender.
//!
//! This crate provides the pieces the fusion model is assembled from:
//!
//! - **Tensor**: dense row-major `f32` storage with the graph's operations
//! - **Dense layers**: fully connected transformations with explicit
//!   backward passes
//! - **Activations**: ReLU, Sigmoid, and a row-wise softmax helper
//! - **Dropout**: inverted dropout with seeded masks
//! - **Batch normalization**: moving-average statistics with an explicit
//!   train/inference mode on every call
//! - **Embeddings**: index-based tables with scatter-add gradients
//! - **Sparse bag-of-words**: COO indicator batches for variable-length
//!   word lists
//! - **Attention fusion**: learned softmax gating over item modalities
//! - **Visual encoder**: a variational head compressing raw visual
//!   features into the shared latent space
//!
//! # Quick start
//!
//! ```
//! use fusionrec_layers::prelude::*;
//!
//! let dense = Dense::new(16, 8, 1024);
//! let relu = ReLU::new();
//! let input = Tensor::rand(&[4, 16]);
//! let hidden = relu.forward(&dense.forward(&input).unwrap()).unwrap();
//! assert_eq!(hidden.shape(), &[4, 8]);
//! ```
//!
//! Every layer separates the inference path (`forward`, immutable) from the
//! training path (`forward_train`, which caches whatever `backward` needs).
//! Gradients stay on the layer until an optimizer consumes them through
//! [`layer::ParamVisitor`].

#![warn(missing_docs)]

pub mod activation;
pub mod attention;
pub mod dense;
pub mod dropout;
pub mod embedding;
pub mod error;
pub mod initializer;
pub mod layer;
pub mod normalization;
pub mod regularizer;
pub mod rng;
pub mod sparse;
pub mod tensor;
pub mod vae;

pub use activation::{softmax_rows, ReLU, Sigmoid};
pub use attention::{AttentionFusion, AttentionFusionConfig};
pub use dense::Dense;
pub use dropout::Dropout;
pub use embedding::EmbeddingTable;
pub use error::{LayerError, LayerResult};
pub use initializer::Initializer;
pub use layer::{Layer, ParamVisitor};
pub use normalization::BatchNorm;
pub use regularizer::Regularizer;
pub use rng::Lcg;
pub use sparse::SparseBow;
pub use tensor::Tensor;
pub use vae::{VisualEncoder, VisualEncoderConfig};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::activation::{softmax_rows, ReLU, Sigmoid};
    pub use crate::attention::{AttentionFusion, AttentionFusionConfig};
    pub use crate::dense::Dense;
    pub use crate::dropout::Dropout;
    pub use crate::embedding::EmbeddingTable;
    pub use crate::error::{LayerError, LayerResult};
    pub use crate::initializer::Initializer;
    pub use crate::layer::{Layer, ParamVisitor};
    pub use crate::normalization::BatchNorm;
    pub use crate::regularizer::Regularizer;
    pub use crate::sparse::SparseBow;
    pub use crate::tensor::Tensor;
    pub use crate::vae::{VisualEncoder, VisualEncoderConfig};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_layer_composition() {
        let dense = Dense::new(10, 5, 7);
        let relu = ReLU::new();
        let input = Tensor::rand(&[3, 10]);
        let h = dense.forward(&input).unwrap();
        let out = relu.forward(&h).unwrap();
        assert_eq!(out.shape(), &[3, 5]);
    }

    #[test]
    fn test_fusion_end_to_end() {
        let fusion = AttentionFusion::new(&AttentionFusionConfig {
            dim_k: 8,
            att_dim: 4,
            num_modalities: 2,
            seed: 1,
        })
        .unwrap();
        let user = Tensor::rand(&[3, 8]);
        let ctx = Tensor::rand(&[3, 8]);
        let mods = vec![Tensor::rand(&[3, 8]), Tensor::rand(&[3, 8])];
        let (fused, gates) = fusion.forward(&user, &ctx, &mods).unwrap();
        assert_eq!(fused.shape(), &[3, 8]);
        assert_eq!(gates.shape(), &[3, 2]);
    }

    #[test]
    fn test_sparse_words_into_embedding() {
        let bow = SparseBow::from_word_lists(&[vec![1, 2], vec![]], 4).unwrap();
        let table = EmbeddingTable::new(4, 6, 3);
        let out = bow.matmul(table.weights()).unwrap();
        assert_eq!(out.shape(), &[2, 6]);
        // The empty sample contributes nothing.
        assert!(out.data()[6..].iter().all(|&x| x == 0.0));
    }
}
