//! Dense tensor type used by every layer in the crate.
//!
//! Row-major `f32` storage with exactly the operations the fusion graph
//! needs. Shape misuse is a programming error and panics; recoverable
//! failures are reported by the layers, not here.

use serde::{Deserialize, Serialize};

/// A multi-dimensional array in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor of the given shape filled with zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; numel],
        }
    }

    /// Creates a tensor of the given shape filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![1.0; numel],
        }
    }

    /// Creates a tensor from raw data.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not match the shape.
    pub fn from_data(shape: &[usize], data: Vec<f32>) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "data length {} does not match shape {:?}",
            data.len(),
            shape
        );
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Uniform random values in [0, 1) from a fixed-seed generator.
    ///
    /// Only useful for tests and examples; parameter initialization goes
    /// through [`crate::initializer::Initializer`] with an explicit seed.
    pub fn rand(shape: &[usize]) -> Self {
        let mut rng = crate::rng::Lcg::new(42);
        let numel: usize = shape.iter().product();
        let data: Vec<f32> = (0..numel).map(|_| rng.next_f32()).collect();
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Returns the shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns the underlying data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the underlying data mutably.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Number of rows of a 2D tensor.
    pub fn rows(&self) -> usize {
        assert_eq!(self.ndim(), 2, "rows() requires a 2D tensor");
        self.shape[0]
    }

    /// Number of columns of a 2D tensor.
    pub fn cols(&self) -> usize {
        assert_eq!(self.ndim(), 2, "cols() requires a 2D tensor");
        self.shape[1]
    }

    /// Matrix product of two 2D tensors.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(
            self.shape[1], other.shape[0],
            "inner dimensions must match: {:?} x {:?}",
            self.shape, other.shape
        );

        let m = self.shape[0];
        let k = self.shape[1];
        let n = other.shape[1];

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a = self.data[i * k + l];
                if a == 0.0 {
                    continue;
                }
                for j in 0..n {
                    result[i * n + j] += a * other.data[l * n + j];
                }
            }
        }
        Tensor::from_data(&[m, n], result)
    }

    /// Transpose of a 2D tensor.
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires a 2D tensor");
        let m = self.shape[0];
        let n = self.shape[1];
        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                result[j * m + i] = self.data[i * n + j];
            }
        }
        Tensor::from_data(&[n, m], result)
    }

    /// Element-wise addition. A 1D right-hand side of matching width
    /// broadcasts across the rows of a 2D left-hand side (bias addition).
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let data = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a + b)
                .collect();
            Tensor::from_data(&self.shape, data)
        } else if self.ndim() == 2 && other.ndim() == 1 && self.shape[1] == other.shape[0] {
            let n = self.shape[1];
            let mut data = self.data.clone();
            for i in 0..self.shape[0] {
                for j in 0..n {
                    data[i * n + j] += other.data[j];
                }
            }
            Tensor::from_data(&self.shape, data)
        } else {
            panic!("cannot add shapes {:?} and {:?}", self.shape, other.shape);
        }
    }

    /// Element-wise subtraction of same-shape tensors.
    pub fn sub(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "cannot subtract shapes {:?} and {:?}",
            self.shape, other.shape
        );
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a - b)
            .collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Element-wise product of same-shape tensors.
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "cannot multiply shapes {:?} and {:?}",
            self.shape, other.shape
        );
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Multiplies every element of row `i` by `factors[i]`.
    ///
    /// Used to apply per-sample gates to `[batch, dim]` tensors.
    pub fn scale_rows(&self, factors: &[f32]) -> Tensor {
        assert_eq!(self.ndim(), 2, "scale_rows requires a 2D tensor");
        assert_eq!(
            self.shape[0],
            factors.len(),
            "one factor per row expected: {} rows, {} factors",
            self.shape[0],
            factors.len()
        );
        let n = self.shape[1];
        let mut data = self.data.clone();
        for (i, f) in factors.iter().enumerate() {
            for j in 0..n {
                data[i * n + j] *= f;
            }
        }
        Tensor::from_data(&self.shape, data)
    }

    /// Scalar multiplication.
    pub fn scale(&self, scalar: f32) -> Tensor {
        let data = self.data.iter().map(|a| a * scalar).collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Sum along an axis of a 2D tensor. Axis 0 collapses rows into a
    /// `[cols]` vector, axis 1 collapses columns into a `[rows]` vector.
    pub fn sum_axis(&self, axis: usize) -> Tensor {
        assert_eq!(self.ndim(), 2, "sum_axis requires a 2D tensor");
        let (m, n) = (self.shape[0], self.shape[1]);
        match axis {
            0 => {
                let mut result = vec![0.0; n];
                for i in 0..m {
                    for j in 0..n {
                        result[j] += self.data[i * n + j];
                    }
                }
                Tensor::from_data(&[n], result)
            }
            1 => {
                let result: Vec<f32> = (0..m)
                    .map(|i| self.data[i * n..(i + 1) * n].iter().sum())
                    .collect();
                Tensor::from_data(&[m], result)
            }
            _ => panic!("axis {} out of bounds for 2D tensor", axis),
        }
    }

    /// Mean along an axis of a 2D tensor.
    pub fn mean_axis(&self, axis: usize) -> Tensor {
        let sum = self.sum_axis(axis);
        let count = self.shape[axis] as f32;
        sum.scale(1.0 / count)
    }

    /// Population variance along axis 0 of a 2D tensor.
    pub fn var_axis0(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "var_axis0 requires a 2D tensor");
        let (m, n) = (self.shape[0], self.shape[1]);
        let mean = self.mean_axis(0);
        let mut result = vec![0.0; n];
        for j in 0..n {
            let mu = mean.data[j];
            for i in 0..m {
                let diff = self.data[i * n + j] - mu;
                result[j] += diff * diff;
            }
            result[j] /= m as f32;
        }
        Tensor::from_data(&[n], result)
    }

    /// Element-wise square.
    pub fn sqr(&self) -> Tensor {
        self.map(|x| x * x)
    }

    /// Element-wise absolute value.
    pub fn abs(&self) -> Tensor {
        self.map(f32::abs)
    }

    /// Applies a function element-wise.
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        let data = self.data.iter().map(|&x| f(x)).collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Reshapes without changing the element count.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "cannot reshape {} elements to {:?}",
            self.numel(),
            new_shape
        );
        Tensor::from_data(new_shape, self.data.clone())
    }

    /// Concatenates 2D tensors along the feature axis. All parts must have
    /// the same number of rows.
    pub fn concat_cols(parts: &[&Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_cols needs at least one tensor");
        let m = parts[0].rows();
        for t in parts {
            assert_eq!(t.rows(), m, "concat_cols rows mismatch");
        }
        let total: usize = parts.iter().map(|t| t.cols()).sum();
        let mut data = Vec::with_capacity(m * total);
        for i in 0..m {
            for t in parts {
                let n = t.cols();
                data.extend_from_slice(&t.data[i * n..(i + 1) * n]);
            }
        }
        Tensor::from_data(&[m, total], data)
    }

    /// Splits a 2D tensor into column blocks of the given widths.
    ///
    /// # Panics
    ///
    /// Panics if the widths do not sum to the column count.
    pub fn split_cols(&self, widths: &[usize]) -> Vec<Tensor> {
        assert_eq!(self.ndim(), 2, "split_cols requires a 2D tensor");
        let m = self.shape[0];
        let n = self.shape[1];
        assert_eq!(
            widths.iter().sum::<usize>(),
            n,
            "split widths {:?} do not cover {} columns",
            widths,
            n
        );
        let mut parts = Vec::with_capacity(widths.len());
        let mut offset = 0;
        for &w in widths {
            let mut data = Vec::with_capacity(m * w);
            for i in 0..m {
                let start = i * n + offset;
                data.extend_from_slice(&self.data[start..start + w]);
            }
            parts.push(Tensor::from_data(&[m, w], data));
            offset += w;
        }
        parts
    }

    /// Adds `other` into `self` in place (same shape).
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(
            self.shape, other.shape,
            "cannot accumulate shapes {:?} and {:?}",
            self.shape, other.shape
        );
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }
}
