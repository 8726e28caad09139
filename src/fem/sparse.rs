use super::{HangingNodes, Mesh};
use nalgebra::DVector;
use std::collections::BTreeSet;
use std::ops::Range;
use std::rc::Rc;

/// Holds the compressed-sparse-row structure of the global matrices
///
/// The pattern couples all nodes of a cell and also the masters of its hanging nodes,
/// so that the condensation of constraints never creates new entries.
#[derive(Clone, Debug)]
pub struct SparsityPattern {
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
}

impl SparsityPattern {
    /// Allocates a new instance
    pub fn new(mesh: &Mesh, constraints: &HangingNodes) -> Self {
        let n = mesh.n_nodes();
        let mut rows: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for c in 0..mesh.n_cells() {
            let mut support = Vec::new();
            for &node in mesh.cell_nodes(c) {
                support.push(node);
                if let Some(list) = constraints.masters(node) {
                    support.extend(list.iter().map(|(m, _)| *m));
                }
            }
            for &i in &support {
                rows[i].extend(support.iter().copied());
            }
        }
        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut col_idx = Vec::new();
        row_ptr.push(0);
        for (i, row) in rows.iter_mut().enumerate() {
            row.insert(i);
            col_idx.extend(row.iter().copied());
            row_ptr.push(col_idx.len());
        }
        SparsityPattern { row_ptr, col_idx }
    }

    /// Returns the number of rows
    pub fn n_rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    /// Returns the number of stored entries
    pub fn n_nonzeros(&self) -> usize {
        self.col_idx.len()
    }

    /// Returns the range of positions of a row
    pub fn row_range(&self, i: usize) -> Range<usize> {
        self.row_ptr[i]..self.row_ptr[i + 1]
    }

    /// Returns the column index at a position
    pub fn col(&self, p: usize) -> usize {
        self.col_idx[p]
    }

    /// Finds the position of (i, j)
    pub fn find(&self, i: usize, j: usize) -> Option<usize> {
        let range = self.row_range(i);
        let start = range.start;
        self.col_idx[range].binary_search(&j).ok().map(|k| start + k)
    }
}

/// Implements a sparse matrix sharing a sparsity pattern
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    pattern: Rc<SparsityPattern>,
    values: Vec<f64>,
}

impl SparseMatrix {
    /// Allocates a zero matrix
    pub fn new(pattern: Rc<SparsityPattern>) -> Self {
        let values = vec![0.0; pattern.n_nonzeros()];
        SparseMatrix { pattern, values }
    }

    /// Returns the dimension
    pub fn dim(&self) -> usize {
        self.pattern.n_rows()
    }

    /// Returns access to the pattern
    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    /// Returns the stored values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns mutable access to the stored values
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Sets all values to zero
    pub fn set_zero(&mut self) {
        self.values.fill(0.0);
    }

    /// Adds a value to (i, j)
    ///
    /// # Panics
    ///
    /// Panics if (i, j) is not in the pattern (this is a bug).
    pub fn add(&mut self, i: usize, j: usize, value: f64) {
        match self.pattern.find(i, j) {
            Some(p) => self.values[p] += value,
            None => panic!("entry ({}, {}) is not in the sparsity pattern", i, j),
        }
    }

    /// Returns the value at (i, j) (zero if not stored)
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.pattern.find(i, j).map_or(0.0, |p| self.values[p])
    }

    /// Returns the diagonal value of a row
    pub fn diag(&self, i: usize) -> f64 {
        self.get(i, i)
    }

    /// Copies the values of another matrix with the same pattern
    pub fn copy_from(&mut self, other: &SparseMatrix) {
        self.values.copy_from_slice(&other.values);
    }

    /// Performs self += alpha * other (same pattern)
    pub fn add_scaled(&mut self, alpha: f64, other: &SparseMatrix) {
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a += alpha * b;
        }
    }

    /// Computes dst = self * src
    pub fn vmult(&self, dst: &mut DVector<f64>, src: &DVector<f64>) {
        for i in 0..self.dim() {
            let mut sum = 0.0;
            for p in self.pattern.row_range(i) {
                sum += self.values[p] * src[self.pattern.col(p)];
            }
            dst[i] = sum;
        }
    }

    /// Computes dst += self * src
    pub fn vmult_add(&self, dst: &mut DVector<f64>, src: &DVector<f64>) {
        for i in 0..self.dim() {
            let mut sum = 0.0;
            for p in self.pattern.row_range(i) {
                sum += self.values[p] * src[self.pattern.col(p)];
            }
            dst[i] += sum;
        }
    }

    /// Applies prescribed values by eliminating rows and columns
    ///
    /// The equation of each prescribed node becomes `d x_k = d g_k`, where `d` is the existing
    /// diagonal (or the mean absolute diagonal if zero). The column entries are moved to the
    /// right-hand side, keeping the matrix symmetric if it was.
    pub fn apply_boundary_values(&mut self, prescribed: &[(usize, f64)], x: &mut DVector<f64>, rhs: &mut DVector<f64>) {
        if prescribed.is_empty() {
            return;
        }
        let n = self.dim();
        let mean_diag = {
            let sum: f64 = (0..n).map(|i| f64::abs(self.diag(i))).sum();
            if sum > 0.0 {
                sum / (n as f64)
            } else {
                1.0
            }
        };
        for &(k, g) in prescribed {
            let pk = match self.pattern.find(k, k) {
                Some(p) => p,
                None => continue,
            };
            let d = if self.values[pk] != 0.0 { self.values[pk] } else { mean_diag };
            for p in self.pattern.row_range(k) {
                let j = self.pattern.col(p);
                if j == k {
                    continue;
                }
                self.values[p] = 0.0;
                if let Some(q) = self.pattern.find(j, k) {
                    rhs[j] -= self.values[q] * g;
                    self.values[q] = 0.0;
                }
            }
            self.values[pk] = d;
            rhs[k] = d * g;
            x[k] = g;
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
