//! In-memory tabular sample storage for fusionrec.
//!
//! Training and evaluation consume column-oriented [`Table`]s of
//! (user, item, label) rows with their per-item side channels: word-index
//! lists, visual vectors, topic vectors, categorical one-hot indices, and
//! numeric context features. Tables are immutable once built and are
//! consumed through range slices ([`TableView`]), numpy-style
//! `array_split` chunking, and seeded shuffles.

#![warn(missing_docs)]

pub mod synthetic;
pub mod table;

pub use synthetic::SyntheticConfig;
pub use table::{Sample, Table, TableSchema, TableView};

use thiserror::Error;

/// Errors raised while assembling tables.
#[derive(Debug, Error)]
pub enum DataError {
    /// A per-sample column does not have the configured width.
    #[error("column {column} of sample {row} has length {actual}, expected {expected}")]
    DimensionMismatch {
        /// Column name
        column: &'static str,
        /// Row index of the offending sample
        row: usize,
        /// Expected width
        expected: usize,
        /// Actual width
        actual: usize,
    },
}

/// Result type alias for data operations.
pub type DataResult<T> = Result<T, DataError>;
