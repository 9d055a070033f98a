//! Type aliases and common types.

use nalgebra::{DMatrix, DVector};

/// Dense matrix over cells (hypothesis matrices, covariance estimates).
pub type Matrix = DMatrix<f64>;

/// Dense vector over cells (mean vectors, subject profiles).
pub type Vector = DVector<f64>;
