//! Online covariance accumulation for subject profiles.

use crate::types::{Matrix, Vector};

/// Online covariance accumulator using Welford's algorithm.
///
/// Accumulates the mean and the sum of centred outer products in a single
/// pass over subject vectors, avoiding a second pass over the data.
#[derive(Debug, Clone)]
pub struct WelfordCovariance {
    /// Count of vectors accumulated so far.
    n: usize,
    /// Running mean of vectors.
    mean: Vector,
    /// Sum of outer products: Σ(x - μ)(x - μ)^T
    m2: Matrix,
}

impl WelfordCovariance {
    /// Create an accumulator for `dim`-dimensional vectors.
    pub fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: Vector::zeros(dim),
            m2: Matrix::zeros(dim, dim),
        }
    }

    /// Update the accumulator with a new vector.
    ///
    /// ```text
    /// δ = x - μₙ₋₁
    /// μₙ = μₙ₋₁ + δ/n
    /// δ' = x - μₙ
    /// M2ₙ = M2ₙ₋₁ + δ·δ'^T
    /// ```
    pub fn update(&mut self, x: &Vector) {
        assert_eq!(x.len(), self.mean.len(), "dimension mismatch");

        self.n += 1;
        let n = self.n as f64;

        let delta = x - &self.mean;
        self.mean += &delta / n;
        let delta2 = x - &self.mean;
        self.m2 += &delta * delta2.transpose();
    }

    /// Count of vectors accumulated so far.
    pub fn count(&self) -> usize {
        self.n
    }

    /// Running mean.
    pub fn mean(&self) -> &Vector {
        &self.mean
    }

    /// Unbiased sample covariance M2/(n-1).
    ///
    /// The outer products δ·δ'^T are only symmetric up to rounding, so the
    /// result is symmetrized. Returns the zero matrix for n < 2.
    pub fn finalize(&self) -> Matrix {
        if self.n < 2 {
            return Matrix::zeros(self.m2.nrows(), self.m2.ncols());
        }

        let cov = &self.m2 / (self.n - 1) as f64;
        (&cov + cov.transpose()) * 0.5
    }
}
