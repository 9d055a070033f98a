//! Moment estimation: cell means and the covariance of the mean vector.
//!
//! For between-subject group `i` with `nᵢ` subjects and subject profiles
//! `X_ik ∈ ℝᵈ`, the group mean is `X̄ᵢ` and the unbiased covariance of the
//! profiles is `V̂ᵢ`. Groups are independent, so the covariance of the stacked
//! mean vector `μ̂ = (X̄₁, …, X̄ₐ)` is block diagonal with blocks `V̂ᵢ / nᵢ`.
//! Singular estimates (e.g. `d > nᵢ`) are not guarded here; the statistic
//! evaluator detects them.

use crate::design::Design;
use crate::error::Result;
use crate::sample::{Sample, SubjectTable};
use crate::types::{Matrix, Vector};

use super::covariance::WelfordCovariance;

/// Means and covariance estimate derived from one (possibly resampled) table.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentEstimate {
    /// Cell means in canonical order.
    pub means: Vector,
    /// Covariance of the cell-mean vector: block diagonal, block `i` is `V̂ᵢ / nᵢ`.
    pub covariance: Matrix,
    /// Per-group profile covariances `V̂ᵢ` (not divided by `nᵢ`).
    pub group_covariances: Vec<Matrix>,
    /// Subjects per group.
    pub group_sizes: Vec<usize>,
}

impl MomentEstimate {
    /// Estimate moments from a subject table.
    pub fn from_table(table: &SubjectTable) -> Self {
        let d = table.n_repeated();
        let n_cells = table.n_cells();

        let mut means = Vector::zeros(n_cells);
        let mut covariance = Matrix::zeros(n_cells, n_cells);
        let mut group_covariances = Vec::with_capacity(table.groups().len());

        for (i, group) in table.groups().iter().enumerate() {
            let mut acc = WelfordCovariance::new(d);
            for row in group.row_iter() {
                acc.update(&row.transpose());
            }

            let v = acc.finalize();
            let offset = i * d;
            means.rows_mut(offset, d).copy_from(acc.mean());
            covariance
                .view_mut((offset, offset), (d, d))
                .copy_from(&(&v / group.nrows() as f64));
            group_covariances.push(v);
        }

        Self {
            means,
            covariance,
            group_covariances,
            group_sizes: table.group_sizes(),
        }
    }

    /// Total number of subjects `N = Σ nᵢ`.
    pub fn n_subjects(&self) -> usize {
        self.group_sizes.iter().sum()
    }

    /// Repeated measurements per group block.
    pub fn block_size(&self) -> usize {
        self.means.len() / self.group_sizes.len()
    }
}

/// Validate and arrange a sample, then estimate its moments.
///
/// # Errors
///
/// Propagates the data errors of [`Sample::arrange`].
pub fn estimate_moments(sample: &Sample, design: &Design) -> Result<MomentEstimate> {
    let table = sample.arrange(design)?;
    Ok(MomentEstimate::from_table(&table))
}
