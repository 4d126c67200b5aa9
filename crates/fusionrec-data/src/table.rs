//! Column-oriented sample storage.

use serde::{Deserialize, Serialize};

use crate::{DataError, DataResult};

/// Fixed widths of the per-sample dense columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Width of the raw visual feature vector.
    pub visual_dim: usize,
    /// Width of the topic-model vector.
    pub topic_dim: usize,
    /// Width of the numeric context vector.
    pub context_dim: usize,
    /// Width of the numeric face-statistics vector.
    pub face_dim: usize,
    /// Number of categorical one-hot fields.
    pub one_hot_fields: usize,
}

/// One (user, item, label) row with its side channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// External user id, carried through to the prediction artifact.
    pub user_id: i64,
    /// External item id, carried through to the prediction artifact.
    pub item_id: i64,
    /// Row index into the user embedding table.
    pub user_index: usize,
    /// Click label in {0, 1}.
    pub click: f32,
    /// Variable-length word indices describing the item.
    pub words: Vec<usize>,
    /// Raw visual feature vector.
    pub visual: Vec<f32>,
    /// Topic-model vector.
    pub topics: Vec<f32>,
    /// One index per categorical field.
    pub one_hots: Vec<usize>,
    /// Numeric context vector.
    pub context: Vec<f32>,
    /// Numeric face statistics.
    pub face_stats: Vec<f32>,
}

/// Immutable column store of samples.
///
/// Dense columns are stored flat (`row * width + col`) so a contiguous row
/// range can be sliced without copying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    schema: TableSchema,
    user_ids: Vec<i64>,
    item_ids: Vec<i64>,
    user_indices: Vec<usize>,
    clicks: Vec<f32>,
    words: Vec<Vec<usize>>,
    visual: Vec<f32>,
    topics: Vec<f32>,
    one_hots: Vec<usize>,
    context: Vec<f32>,
    face_stats: Vec<f32>,
}

impl Table {
    /// Builds a table from samples, validating every dense column width.
    pub fn from_samples(schema: TableSchema, samples: Vec<Sample>) -> DataResult<Self> {
        let n = samples.len();
        let mut table = Self {
            schema,
            user_ids: Vec::with_capacity(n),
            item_ids: Vec::with_capacity(n),
            user_indices: Vec::with_capacity(n),
            clicks: Vec::with_capacity(n),
            words: Vec::with_capacity(n),
            visual: Vec::with_capacity(n * schema.visual_dim),
            topics: Vec::with_capacity(n * schema.topic_dim),
            one_hots: Vec::with_capacity(n * schema.one_hot_fields),
            context: Vec::with_capacity(n * schema.context_dim),
            face_stats: Vec::with_capacity(n * schema.face_dim),
        };
        for (row, sample) in samples.into_iter().enumerate() {
            check_width("visual", row, schema.visual_dim, sample.visual.len())?;
            check_width("topics", row, schema.topic_dim, sample.topics.len())?;
            check_width("context", row, schema.context_dim, sample.context.len())?;
            check_width("face_stats", row, schema.face_dim, sample.face_stats.len())?;
            check_width("one_hots", row, schema.one_hot_fields, sample.one_hots.len())?;

            table.user_ids.push(sample.user_id);
            table.item_ids.push(sample.item_id);
            table.user_indices.push(sample.user_index);
            table.clicks.push(sample.click);
            table.words.push(sample.words);
            table.visual.extend_from_slice(&sample.visual);
            table.topics.extend_from_slice(&sample.topics);
            table.one_hots.extend_from_slice(&sample.one_hots);
            table.context.extend_from_slice(&sample.context);
            table.face_stats.extend_from_slice(&sample.face_stats);
        }
        Ok(table)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.clicks.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.clicks.is_empty()
    }

    /// The column widths.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// View over the whole table.
    pub fn view(&self) -> TableView<'_> {
        self.slice(0, self.len())
    }

    /// View over rows `[start, end)`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds or reversed.
    pub fn slice(&self, start: usize, end: usize) -> TableView<'_> {
        assert!(
            start <= end && end <= self.len(),
            "invalid slice {start}..{end} of {} rows",
            self.len()
        );
        TableView {
            table: self,
            start,
            end,
        }
    }

    /// Splits the table into `n` contiguous chunks with numpy
    /// `array_split` semantics: the first `len % n` chunks get one extra
    /// row. Chunks may be empty when `n > len`.
    pub fn array_split(&self, n: usize) -> Vec<TableView<'_>> {
        assert!(n > 0, "cannot split into zero chunks");
        let len = self.len();
        let base = len / n;
        let remainder = len % n;
        let mut views = Vec::with_capacity(n);
        let mut start = 0;
        for i in 0..n {
            let size = base + usize::from(i < remainder);
            views.push(self.slice(start, start + size));
            start += size;
        }
        views
    }

    /// Returns a row-permuted copy, shuffled deterministically by seed.
    pub fn shuffled(&self, seed: u64) -> Table {
        let mut order: Vec<usize> = (0..self.len()).collect();
        // Fisher-Yates driven by a seeded LCG stream.
        let mut state = seed;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as usize
        };
        for i in (1..order.len()).rev() {
            order.swap(i, next() % (i + 1));
        }

        let s = &self.schema;
        let mut out = Self {
            schema: *s,
            user_ids: Vec::with_capacity(self.len()),
            item_ids: Vec::with_capacity(self.len()),
            user_indices: Vec::with_capacity(self.len()),
            clicks: Vec::with_capacity(self.len()),
            words: Vec::with_capacity(self.len()),
            visual: Vec::with_capacity(self.visual.len()),
            topics: Vec::with_capacity(self.topics.len()),
            one_hots: Vec::with_capacity(self.one_hots.len()),
            context: Vec::with_capacity(self.context.len()),
            face_stats: Vec::with_capacity(self.face_stats.len()),
        };
        for &row in &order {
            out.user_ids.push(self.user_ids[row]);
            out.item_ids.push(self.item_ids[row]);
            out.user_indices.push(self.user_indices[row]);
            out.clicks.push(self.clicks[row]);
            out.words.push(self.words[row].clone());
            out.visual
                .extend_from_slice(&self.visual[row * s.visual_dim..(row + 1) * s.visual_dim]);
            out.topics
                .extend_from_slice(&self.topics[row * s.topic_dim..(row + 1) * s.topic_dim]);
            out.one_hots.extend_from_slice(
                &self.one_hots[row * s.one_hot_fields..(row + 1) * s.one_hot_fields],
            );
            out.context
                .extend_from_slice(&self.context[row * s.context_dim..(row + 1) * s.context_dim]);
            out.face_stats
                .extend_from_slice(&self.face_stats[row * s.face_dim..(row + 1) * s.face_dim]);
        }
        out
    }
}

fn check_width(
    column: &'static str,
    row: usize,
    expected: usize,
    actual: usize,
) -> DataResult<()> {
    if expected != actual {
        return Err(DataError::DimensionMismatch {
            column,
            row,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Borrowed view over a contiguous row range of a [`Table`].
#[derive(Debug, Clone, Copy)]
pub struct TableView<'a> {
    table: &'a Table,
    start: usize,
    end: usize,
}

impl<'a> TableView<'a> {
    /// Number of rows in the view.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Sub-view over rows `[start, end)` of this view.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds or reversed.
    pub fn slice(&self, start: usize, end: usize) -> TableView<'a> {
        assert!(
            start <= end && end <= self.len(),
            "invalid slice {start}..{end} of {} rows",
            self.len()
        );
        TableView {
            table: self.table,
            start: self.start + start,
            end: self.start + end,
        }
    }

    /// Splits the view into `n` contiguous chunks with numpy `array_split`
    /// semantics, like [`Table::array_split`].
    pub fn array_split(&self, n: usize) -> Vec<TableView<'a>> {
        assert!(n > 0, "cannot split into zero chunks");
        let len = self.len();
        let base = len / n;
        let remainder = len % n;
        let mut views = Vec::with_capacity(n);
        let mut start = 0;
        for i in 0..n {
            let size = base + usize::from(i < remainder);
            views.push(self.slice(start, start + size));
            start += size;
        }
        views
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The underlying schema.
    pub fn schema(&self) -> &TableSchema {
        &self.table.schema
    }

    /// External user ids.
    pub fn user_ids(&self) -> &'a [i64] {
        &self.table.user_ids[self.start..self.end]
    }

    /// External item ids.
    pub fn item_ids(&self) -> &'a [i64] {
        &self.table.item_ids[self.start..self.end]
    }

    /// User embedding row indices.
    pub fn user_indices(&self) -> &'a [usize] {
        &self.table.user_indices[self.start..self.end]
    }

    /// Click labels.
    pub fn clicks(&self) -> &'a [f32] {
        &self.table.clicks[self.start..self.end]
    }

    /// Word-index lists.
    pub fn words(&self) -> &'a [Vec<usize>] {
        &self.table.words[self.start..self.end]
    }

    /// Flattened visual features (`len * visual_dim`).
    pub fn visual_flat(&self) -> &'a [f32] {
        let d = self.table.schema.visual_dim;
        &self.table.visual[self.start * d..self.end * d]
    }

    /// Flattened topic vectors (`len * topic_dim`).
    pub fn topics_flat(&self) -> &'a [f32] {
        let d = self.table.schema.topic_dim;
        &self.table.topics[self.start * d..self.end * d]
    }

    /// Flattened context features (`len * context_dim`).
    pub fn context_flat(&self) -> &'a [f32] {
        let d = self.table.schema.context_dim;
        &self.table.context[self.start * d..self.end * d]
    }

    /// Flattened face statistics (`len * face_dim`).
    pub fn face_flat(&self) -> &'a [f32] {
        let d = self.table.schema.face_dim;
        &self.table.face_stats[self.start * d..self.end * d]
    }

    /// Indices of one categorical field across the view's rows.
    pub fn one_hot_field(&self, field: usize) -> Vec<usize> {
        let f = self.table.schema.one_hot_fields;
        assert!(field < f, "one-hot field {field} out of {f}");
        (self.start..self.end)
            .map(|row| self.table.one_hots[row * f + field])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema {
            visual_dim: 2,
            topic_dim: 1,
            context_dim: 2,
            face_dim: 1,
            one_hot_fields: 2,
        }
    }

    fn sample(i: usize) -> Sample {
        Sample {
            user_id: i as i64,
            item_id: 100 + i as i64,
            user_index: i,
            click: (i % 2) as f32,
            words: vec![i],
            visual: vec![i as f32, 0.0],
            topics: vec![0.5],
            one_hots: vec![i % 3, i % 2],
            context: vec![1.0, -1.0],
            face_stats: vec![0.0],
        }
    }

    fn table(n: usize) -> Table {
        Table::from_samples(schema(), (0..n).map(sample).collect()).unwrap()
    }

    #[test]
    fn test_construction_and_slicing() {
        let t = table(5);
        assert_eq!(t.len(), 5);
        let view = t.slice(1, 4);
        assert_eq!(view.len(), 3);
        assert_eq!(view.user_indices(), &[1, 2, 3]);
        assert_eq!(view.visual_flat(), &[1.0, 0.0, 2.0, 0.0, 3.0, 0.0]);
        assert_eq!(view.one_hot_field(0), vec![1, 2, 0]);
    }

    #[test]
    fn test_bad_width_rejected() {
        let mut bad = sample(0);
        bad.visual = vec![1.0];
        let err = Table::from_samples(schema(), vec![bad]).unwrap_err();
        assert!(err.to_string().contains("visual"));
    }

    #[test]
    fn test_array_split_matches_numpy() {
        let t = table(10);
        let sizes: Vec<usize> = t.array_split(3).iter().map(|v| v.len()).collect();
        // numpy: array_split(10, 3) -> [4, 3, 3]
        assert_eq!(sizes, vec![4, 3, 3]);

        let sizes: Vec<usize> = t.array_split(4).iter().map(|v| v.len()).collect();
        // numpy: array_split(10, 4) -> [3, 3, 2, 2]
        assert_eq!(sizes, vec![3, 3, 2, 2]);

        // More chunks than rows: trailing chunks are empty.
        let sizes: Vec<usize> = table(2).array_split(4).iter().map(|v| v.len()).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_view_subslice_and_split() {
        let t = table(10);
        let view = t.slice(2, 9);
        let sub = view.slice(1, 4);
        assert_eq!(sub.user_indices(), &[3, 4, 5]);

        let sizes: Vec<usize> = view.array_split(3).iter().map(|v| v.len()).collect();
        // 7 rows into 3 chunks: [3, 2, 2].
        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(view.array_split(3)[1].user_indices(), &[5, 6]);
    }

    #[test]
    fn test_split_covers_all_rows_in_order() {
        let t = table(7);
        let mut seen = Vec::new();
        for view in t.array_split(3) {
            seen.extend_from_slice(view.user_indices());
        }
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_is_seeded_permutation() {
        let t = table(16);
        let a = t.shuffled(42);
        let b = t.shuffled(42);
        let c = t.shuffled(43);

        assert_eq!(a.user_indices, b.user_indices);
        assert_ne!(a.user_indices, c.user_indices);

        let mut sorted = a.user_indices.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..16).collect::<Vec<_>>());

        // Rows stay aligned across columns.
        for row in 0..a.len() {
            let idx = a.user_indices[row];
            assert_eq!(a.visual[row * 2], idx as f32);
            assert_eq!(a.user_ids[row], idx as i64);
        }
    }
}
