//! Weight matrices of connections, with rows indexed by source units and columns by target units.
//!
//! Dense matrices store every entry. Sparse matrices store only the synapses of the connectivity pattern, in
//! compressed rows with an additional column index, so that both row updates (source spikes) and column updates
//! (target spikes) touch only existing synapses. The pattern of a sparse matrix never changes: only the values of
//! existing entries are mutable.
use itertools::Itertools;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Compressed sparse rows with a column index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    num_rows: usize,
    num_cols: usize,
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
    col_ptr: Vec<usize>,
    col_entries: Vec<usize>,
}

impl SparseMatrix {
    /// Build a sparse matrix from `(row, col, weight)` triplets, in any order.
    /// Returns an error for out-of-bounds or duplicate entries.
    pub fn from_triplets(
        num_rows: usize,
        num_cols: usize,
        triplets: Vec<(usize, usize, f64)>,
    ) -> Result<Self, SimError> {
        if let Some(&(i, j, _)) = triplets.iter().find(|(i, j, _)| *i >= num_rows || *j >= num_cols) {
            return Err(SimError::OutOfBounds(format!(
                "synapse ({}, {}) in a {}x{} matrix",
                i, j, num_rows, num_cols
            )));
        }

        let triplets: Vec<(usize, usize, f64)> = triplets
            .into_iter()
            .sorted_by_key(|(i, j, _)| (*i, *j))
            .collect();
        if let Some(((i, j, _), _)) = triplets
            .iter()
            .tuple_windows()
            .find(|(a, b)| a.0 == b.0 && a.1 == b.1)
        {
            return Err(SimError::InvalidParameters(format!(
                "duplicate synapse ({}, {})",
                i, j
            )));
        }

        let mut row_ptr = vec![0; num_rows + 1];
        for (i, _, _) in triplets.iter() {
            row_ptr[i + 1] += 1;
        }
        for i in 0..num_rows {
            row_ptr[i + 1] += row_ptr[i];
        }
        let cols: Vec<usize> = triplets.iter().map(|(_, j, _)| *j).collect();
        let values: Vec<f64> = triplets.iter().map(|(_, _, w)| *w).collect();

        // Entries of each column, in increasing row order
        let mut col_ptr = vec![0; num_cols + 1];
        for j in cols.iter() {
            col_ptr[j + 1] += 1;
        }
        for j in 0..num_cols {
            col_ptr[j + 1] += col_ptr[j];
        }
        let mut fill = col_ptr.clone();
        let mut col_entries = vec![0; cols.len()];
        for (pos, j) in cols.iter().enumerate() {
            col_entries[fill[*j]] = pos;
            fill[*j] += 1;
        }

        Ok(SparseMatrix {
            num_rows,
            num_cols,
            row_ptr,
            cols,
            values,
            col_ptr,
            col_entries,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.num_rows, self.num_cols)
    }

    /// The number of synapses.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Returns the target indices and weights of a row.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.cols[range.clone()], &self.values[range])
    }

    fn position(&self, i: usize, j: usize) -> Option<usize> {
        let start = self.row_ptr[i];
        self.cols[start..self.row_ptr[i + 1]]
            .binary_search(&j)
            .ok()
            .map(|offset| start + offset)
    }

    /// Returns the weight of a synapse, or `None` if it is not part of the pattern.
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.position(i, j).map(|pos| self.values[pos])
    }

    /// Update every weight of a row with `f(target, weight)`.
    pub fn update_row<F: FnMut(usize, f64) -> f64>(&mut self, i: usize, mut f: F) {
        for pos in self.row_ptr[i]..self.row_ptr[i + 1] {
            self.values[pos] = f(self.cols[pos], self.values[pos]);
        }
    }

    /// Update every weight of a column with `f(source, weight)`.
    pub fn update_column<F: FnMut(usize, f64) -> f64>(&mut self, j: usize, mut f: F) {
        for &pos in self.col_entries[self.col_ptr[j]..self.col_ptr[j + 1]].iter() {
            let i = self.row_ptr.partition_point(|&start| start <= pos) - 1;
            self.values[pos] = f(i, self.values[pos]);
        }
    }

    /// Iterate over `(row, col, weight)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.num_rows).flat_map(move |i| {
            let (cols, values) = self.row(i);
            cols.iter().zip(values.iter()).map(move |(j, w)| (i, *j, *w))
        })
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.num_rows, self.num_cols);
        for (i, j, w) in self.iter() {
            dense[(i, j)] = w;
        }
        dense
    }
}

/// The weights of a connection.
///
/// A dense matrix stores every entry. With a mask, only the entries set in the mask are synapses: the others stay zero
/// and reject non-zero writes, exactly as the missing entries of a sparse matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WeightMatrix {
    Dense {
        values: DMatrix<f64>,
        mask: Option<DMatrix<bool>>,
    },
    Sparse(SparseMatrix),
}

impl WeightMatrix {
    /// A dense matrix in which every entry is a synapse.
    pub fn dense(values: DMatrix<f64>) -> Self {
        WeightMatrix::Dense { values, mask: None }
    }

    /// A dense matrix restricted to the entries of `mask`. Entries outside the mask are set to zero.
    /// Returns an error if the shapes differ.
    pub fn masked(mut values: DMatrix<f64>, mask: DMatrix<bool>) -> Result<Self, SimError> {
        if values.shape() != mask.shape() {
            return Err(SimError::IncompatibleShape(format!(
                "Mask of shape {:?} for a weight matrix of shape {:?}",
                mask.shape(),
                values.shape()
            )));
        }
        for (w, _) in values.iter_mut().zip(mask.iter()).filter(|(_, m)| !**m) {
            *w = 0.0;
        }
        Ok(WeightMatrix::Dense {
            values,
            mask: Some(mask),
        })
    }

    /// Dense storage of a sparse matrix, keeping its pattern.
    pub fn densify(sparse: &SparseMatrix) -> Self {
        let (rows, cols) = sparse.shape();
        let mut mask = DMatrix::from_element(rows, cols, false);
        for (i, j, _) in sparse.iter() {
            mask[(i, j)] = true;
        }
        WeightMatrix::Dense {
            values: sparse.to_dense(),
            mask: Some(mask),
        }
    }

    /// Returns `(number of source units, number of target units)`.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            WeightMatrix::Dense { values, .. } => values.shape(),
            WeightMatrix::Sparse(m) => m.shape(),
        }
    }

    /// The number of synapses in the connectivity pattern.
    pub fn nnz(&self) -> usize {
        match self {
            WeightMatrix::Dense { values, mask: None } => values.len(),
            WeightMatrix::Dense {
                mask: Some(mask), ..
            } => mask.iter().filter(|m| **m).count(),
            WeightMatrix::Sparse(m) => m.nnz(),
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, WeightMatrix::Dense { .. })
    }

    /// Whether the synapse `(i, j)` is part of the connectivity pattern.
    pub fn contains(&self, i: usize, j: usize) -> bool {
        let (rows, cols) = self.shape();
        if i >= rows || j >= cols {
            return false;
        }
        match self {
            WeightMatrix::Dense { mask, .. } => in_mask(mask, i, j),
            WeightMatrix::Sparse(m) => m.position(i, j).is_some(),
        }
    }

    /// Returns the weight from source `i` to target `j`, zero outside the pattern.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match self {
            WeightMatrix::Dense { values, .. } => values.get((i, j)).copied().unwrap_or(0.0),
            WeightMatrix::Sparse(m) => {
                if i < m.num_rows {
                    m.get(i, j).unwrap_or(0.0)
                } else {
                    0.0
                }
            }
        }
    }

    /// Set the weight from source `i` to target `j`.
    /// Returns an error if the synapse is outside the pattern and `weight` is not zero.
    pub fn set(&mut self, i: usize, j: usize, weight: f64) -> Result<(), SimError> {
        let (rows, cols) = self.shape();
        if i >= rows || j >= cols {
            return Err(SimError::OutOfBounds(format!(
                "synapse ({}, {}) in a {}x{} matrix",
                i, j, rows, cols
            )));
        }
        let position = match self {
            WeightMatrix::Dense { values, mask } => {
                if in_mask(mask, i, j) {
                    values[(i, j)] = weight;
                    return Ok(());
                }
                None
            }
            WeightMatrix::Sparse(m) => m.position(i, j),
        };
        match (self, position) {
            (WeightMatrix::Sparse(m), Some(pos)) => {
                m.values[pos] = weight;
                Ok(())
            }
            _ if weight == 0.0 => Ok(()),
            _ => Err(SimError::StructuralViolation {
                source: i,
                target: j,
            }),
        }
    }

    /// Add `factor * W[i, :]` to `target`.
    pub fn propagate_row(&self, i: usize, factor: f64, target: &mut [f64]) {
        match self {
            WeightMatrix::Dense { values, .. } => {
                for (x, w) in target.iter_mut().zip(values.row(i).iter()) {
                    *x += factor * w;
                }
            }
            WeightMatrix::Sparse(m) => {
                let (cols, values) = m.row(i);
                for (j, w) in cols.iter().zip(values.iter()) {
                    target[*j] += factor * w;
                }
            }
        }
    }

    /// Update every synapse of row `i` with `f(target, weight)`.
    pub fn update_row<F: FnMut(usize, f64) -> f64>(&mut self, i: usize, mut f: F) {
        match self {
            WeightMatrix::Dense { values, mask } => {
                for j in (0..values.ncols()).filter(|&j| in_mask(mask, i, j)) {
                    values[(i, j)] = f(j, values[(i, j)]);
                }
            }
            WeightMatrix::Sparse(m) => m.update_row(i, f),
        }
    }

    /// Update every synapse of column `j` with `f(source, weight)`.
    pub fn update_column<F: FnMut(usize, f64) -> f64>(&mut self, j: usize, mut f: F) {
        match self {
            WeightMatrix::Dense { values, mask } => {
                for i in (0..values.nrows()).filter(|&i| in_mask(mask, i, j)) {
                    values[(i, j)] = f(i, values[(i, j)]);
                }
            }
            WeightMatrix::Sparse(m) => m.update_column(j, f),
        }
    }

    /// Iterate over the synapses as `(source, target, weight)`.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (usize, usize, f64)> + '_> {
        match self {
            WeightMatrix::Dense { values, mask } => Box::new(
                (0..values.nrows())
                    .cartesian_product(0..values.ncols())
                    .filter(move |&(i, j)| in_mask(mask, i, j))
                    .map(move |(i, j)| (i, j, values[(i, j)])),
            ),
            WeightMatrix::Sparse(m) => Box::new(m.iter()),
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            WeightMatrix::Dense { values, .. } => values.clone(),
            WeightMatrix::Sparse(m) => m.to_dense(),
        }
    }
}

fn in_mask(mask: &Option<DMatrix<bool>>, i: usize, j: usize) -> bool {
    mask.as_ref().map_or(true, |mask| mask[(i, j)])
}
