//! Dense Cholesky factorization
//!
//! Small row-major matrices only: every caller works on a bounded lookback
//! (at most a few hundred points), so O(n^3) is fine and no BLAS is needed.

use thiserror::Error;

/// Row-major dense matrix
pub type Matrix = Vec<Vec<f64>>;

/// Diagonal jitter tried in order until the factorization succeeds
pub const JITTER_LADDER: [f64; 5] = [0.0, 1e-6, 1e-5, 1e-4, 1e-3];

/// Pivots below this fraction of the largest diagonal entry count as zero
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Linear algebra failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinalgError {
    #[error("Matrix of dimension {dimension} is not positive definite (max jitter {max_jitter})")]
    NotPositiveDefinite { dimension: usize, max_jitter: f64 },

    #[error("Matrix is not square: {rows} rows, row {row} has {cols} columns")]
    NotSquare { rows: usize, row: usize, cols: usize },
}

/// Lower-triangular factor L with A + jitter*I = L L^T
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyFactor {
    lower: Matrix,
    jitter: f64,
}

impl CholeskyFactor {
    /// The lower-triangular factor
    pub fn lower(&self) -> &Matrix {
        &self.lower
    }

    /// Jitter that had to be added to the diagonal
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }
}

/// Factor a symmetric matrix, walking the default [`JITTER_LADDER`].
pub fn cholesky_decompose(a: &[Vec<f64>]) -> Result<CholeskyFactor, LinalgError> {
    cholesky_decompose_with(a, &JITTER_LADDER)
}

/// Factor a symmetric matrix, trying each jitter in `ladder` in order.
///
/// Passing `&[0.0]` gives a strict factorization that reports singular
/// matrices instead of regularizing them.
pub fn cholesky_decompose_with(
    a: &[Vec<f64>],
    ladder: &[f64],
) -> Result<CholeskyFactor, LinalgError> {
    let n = a.len();
    for (row, values) in a.iter().enumerate() {
        if values.len() != n {
            return Err(LinalgError::NotSquare {
                rows: n,
                row,
                cols: values.len(),
            });
        }
    }

    let max_diag = (0..n).map(|i| a[i][i].abs()).fold(1.0_f64, f64::max);
    let tolerance = PIVOT_TOLERANCE * max_diag;

    for &jitter in ladder {
        if let Some(lower) = try_factor(a, jitter, tolerance) {
            if jitter > 0.0 {
                tracing::debug!(jitter, dimension = n, "cholesky needed diagonal jitter");
            }
            return Ok(CholeskyFactor { lower, jitter });
        }
    }

    Err(LinalgError::NotPositiveDefinite {
        dimension: n,
        max_jitter: ladder.iter().copied().fold(0.0, f64::max),
    })
}

fn try_factor(a: &[Vec<f64>], jitter: f64, tolerance: f64) -> Option<Matrix> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];

    for j in 0..n {
        let mut pivot = a[j][j] + jitter;
        for k in 0..j {
            pivot -= l[j][k] * l[j][k];
        }
        if !pivot.is_finite() || pivot <= tolerance {
            return None;
        }
        let diag = pivot.sqrt();
        l[j][j] = diag;

        for i in (j + 1)..n {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            l[i][j] = sum / diag;
        }
    }

    Some(l)
}

/// Solve L y = b
pub fn forward_substitute(factor: &CholeskyFactor, b: &[f64]) -> Vec<f64> {
    let l = &factor.lower;
    let n = l.len();
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i][k] * y[k];
        }
        y[i] = sum / l[i][i];
    }
    y
}

/// Solve L^T x = y
fn back_substitute_transposed(factor: &CholeskyFactor, y: &[f64]) -> Vec<f64> {
    let l = &factor.lower;
    let n = l.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[k][i] * x[k];
        }
        x[i] = sum / l[i][i];
    }
    x
}

/// Solve (L L^T) x = b by forward then back substitution
pub fn cholesky_solve(factor: &CholeskyFactor, b: &[f64]) -> Vec<f64> {
    let y = forward_substitute(factor, b);
    back_substitute_transposed(factor, &y)
}

/// log det(L L^T) = 2 * sum(log diag(L))
pub fn cholesky_log_determinant(factor: &CholeskyFactor) -> f64 {
    2.0 * factor
        .lower
        .iter()
        .enumerate()
        .map(|(i, row)| row[i].ln())
        .sum::<f64>()
}
