//! Compressed sparse row matrices assembled from raw triplets.
//!
//! [`CooBuilder`] collects unmerged `(row, col, value)` contributions in any
//! order. [`CooBuilder::build`] hands them to `faer`, which **sums** every
//! group that targets the same coordinate, so callers can emit one
//! contribution per incidence and let assembly realize degrees and weights.
//!
//! # Feature flags
//!
//! - `parallel`: row-parallel matrix-vector products via `rayon`

use faer::sparse::{SparseRowMat, SparseRowMatRef, Triplet};
use nalgebra::Vector3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{MeshError, MeshResult};

/// Rows at or above this count use the parallel product path.
#[cfg(feature = "parallel")]
const PARALLEL_ROW_THRESHOLD: usize = 4096;

/// Triplet accumulator for a sparse matrix.
#[derive(Debug, Clone)]
pub struct CooBuilder {
    n_rows: usize,
    n_cols: usize,
    triplets: Vec<Triplet<usize, usize, f64>>,
}

impl CooBuilder {
    /// Create an empty builder for an `n_rows x n_cols` matrix.
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            triplets: Vec::new(),
        }
    }

    /// Create an empty square builder with room for `capacity` triplets.
    pub fn square_with_capacity(n: usize, capacity: usize) -> Self {
        Self {
            n_rows: n,
            n_cols: n,
            triplets: Vec::with_capacity(capacity),
        }
    }

    /// Record a contribution. Repeated coordinates are summed on build.
    pub fn push(&mut self, row: usize, col: usize, value: f64) -> MeshResult<()> {
        if row >= self.n_rows || col >= self.n_cols {
            return Err(MeshError::invalid_parameter(
                "coordinate",
                format!(
                    "({}, {}) outside a {}x{} matrix",
                    row, col, self.n_rows, self.n_cols
                ),
            ));
        }
        self.triplets.push(Triplet::new(row, col, value));
        Ok(())
    }

    /// Number of raw contributions recorded so far.
    pub fn triplet_count(&self) -> usize {
        self.triplets.len()
    }

    /// Assemble into CSR, summing duplicate coordinates.
    pub fn build(self) -> MeshResult<CsrMatrix> {
        let inner = SparseRowMat::try_new_from_triplets(self.n_rows, self.n_cols, &self.triplets)
            .map_err(|e| {
                MeshError::invalid_parameter(
                    "triplets",
                    format!(
                        "cannot assemble a {}x{} matrix: {:?}",
                        self.n_rows, self.n_cols, e
                    ),
                )
            })?;
        Ok(CsrMatrix { inner })
    }
}

/// Immutable CSR matrix with sorted column indices per row.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    inner: SparseRowMat<usize, f64>,
}

/// Non-zeros of one row.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    pub col_idx: &'a [usize],
    pub values: &'a [f64],
}

impl<'a> RowView<'a> {
    /// Iterate `(col, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.col_idx.iter().copied().zip(self.values.iter().copied())
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }
}

impl CsrMatrix {
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.inner.nrows()
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.inner.ncols()
    }

    /// Number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.inner.as_ref().val().len()
    }

    /// Borrow the underlying `faer` matrix.
    pub fn as_faer(&self) -> SparseRowMatRef<'_, usize, f64> {
        self.inner.as_ref()
    }

    /// Value at `(row, col)`, zero when not stored or out of range.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row >= self.n_rows() {
            return 0.0;
        }
        let view = self.row(row);
        view.col_idx
            .binary_search(&col)
            .map_or(0.0, |idx| view.values[idx])
    }

    /// Stored entries of `row`. Panics if `row >= n_rows`.
    #[inline]
    pub fn row(&self, row: usize) -> RowView<'_> {
        let mat = self.inner.as_ref();
        RowView {
            col_idx: mat.col_idx_of_row_raw(row),
            values: mat.val_of_row(row),
        }
    }

    /// Diagonal entries (zero where none is stored).
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n_rows().min(self.n_cols()))
            .map(|i| self.get(i, i))
            .collect()
    }

    /// Sum of each row.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.n_rows())
            .map(|i| self.row(i).values.iter().sum())
            .collect()
    }

    /// Whether `A[i][j]` equals `A[j][i]` within `tol` for every stored entry.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        if self.n_rows() != self.n_cols() {
            return false;
        }
        (0..self.n_rows()).all(|i| {
            self.row(i)
                .iter()
                .all(|(j, v)| (self.get(j, i) - v).abs() <= tol)
        })
    }

    /// `y = A * x` for a scalar vector.
    pub fn mul_vec(&self, x: &[f64]) -> MeshResult<Vec<f64>> {
        self.check_operand(x.len())?;
        let row_dot = |i: usize| -> f64 { self.row(i).iter().map(|(j, v)| v * x[j]).sum() };
        Ok(self.map_rows(row_dot))
    }

    /// Apply the operator to each coordinate of a `V x 3` array.
    pub fn mul_vectors(&self, x: &[Vector3<f64>]) -> MeshResult<Vec<Vector3<f64>>> {
        self.check_operand(x.len())?;
        let row_dot = |i: usize| -> Vector3<f64> {
            self.row(i)
                .iter()
                .fold(Vector3::zeros(), |acc, (j, v)| acc + x[j] * v)
        };
        Ok(self.map_rows(row_dot))
    }

    fn check_operand(&self, len: usize) -> MeshResult<()> {
        if len != self.n_cols() {
            return Err(MeshError::invalid_parameter(
                "operand",
                format!("length {} does not match {} columns", len, self.n_cols()),
            ));
        }
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn map_rows<T, F>(&self, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        let n_rows = self.n_rows();
        if n_rows >= PARALLEL_ROW_THRESHOLD {
            (0..n_rows).into_par_iter().map(f).collect()
        } else {
            (0..n_rows).map(f).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn map_rows<T, F>(&self, f: F) -> Vec<T>
    where
        F: Fn(usize) -> T,
    {
        (0..self.n_rows()).map(f).collect()
    }
}
