//! Null-model perturbations of a subject table.
//!
//! Each resampling scheme is fitted once to the observed data
//! ([`NullModel::fit`]) and then draws perturbed tables into preallocated
//! buffers, one per repetition. All draws share the observed table's shape:
//! same groups, same group sizes, same repeated measurements.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::ResamplingMethod;
use crate::sample::SubjectTable;
use crate::statistics::MomentEstimate;
use crate::types::{Matrix, Vector};

/// Counter-based RNG seed generation using SplitMix64.
///
/// A stateless PRF that maps (base seed, repetition) to a well-distributed
/// seed, so each repetition owns an independent stream no matter which
/// worker runs it.
#[inline]
pub fn counter_rng_seed(base_seed: u64, counter: u64) -> u64 {
    // See: https://xoshiro.di.unimi.it/splitmix64.c
    let mut z = base_seed.wrapping_add(counter.wrapping_mul(0x9e3779b97f4a7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Symmetric square root `V^{1/2}` of a positive semidefinite matrix.
///
/// Negative eigenvalues from rounding are clamped to zero, so singular
/// covariance estimates are handled without a Cholesky failure.
pub fn symmetric_sqrt(v: &Matrix) -> Matrix {
    let eigen = v.clone().symmetric_eigen();
    let roots = eigen.eigenvalues.map(|l| l.max(0.0).sqrt());
    &eigen.eigenvectors * Matrix::from_diagonal(&roots) * eigen.eigenvectors.transpose()
}

/// A resampling scheme fitted to the observed data.
#[derive(Debug, Clone)]
pub enum NullModel {
    /// Pooled subject profiles, shuffled across groups.
    Permutation {
        /// Observed profiles, one row per subject, groups stacked.
        pooled: Matrix,
        /// Group-centred profiles in the same row order.
        pooled_centered: Matrix,
    },
    /// Square roots of the per-group covariance estimates.
    ParametricBootstrap {
        /// `V̂ᵢ^{1/2}` per group.
        roots: Vec<Matrix>,
    },
    /// Group-centred residual profiles.
    WildBootstrap {
        /// `X_ik − X̄ᵢ`.
        residuals: SubjectTable,
    },
}

impl NullModel {
    /// Fit the scheme to an observed table and its moments.
    pub fn fit(method: ResamplingMethod, table: &SubjectTable, estimate: &MomentEstimate) -> Self {
        match method {
            ResamplingMethod::Permutation => NullModel::Permutation {
                pooled: stack_rows(table),
                pooled_centered: stack_rows(&table.centered()),
            },
            ResamplingMethod::ParametricBootstrap => NullModel::ParametricBootstrap {
                roots: estimate.group_covariances.iter().map(symmetric_sqrt).collect(),
            },
            ResamplingMethod::WildBootstrap => NullModel::WildBootstrap {
                residuals: table.centered(),
            },
        }
    }

    /// The scheme this model implements.
    pub fn method(&self) -> ResamplingMethod {
        match self {
            NullModel::Permutation { .. } => ResamplingMethod::Permutation,
            NullModel::ParametricBootstrap { .. } => ResamplingMethod::ParametricBootstrap,
            NullModel::WildBootstrap { .. } => ResamplingMethod::WildBootstrap,
        }
    }

    /// Draw one perturbed table into `out`.
    ///
    /// For permutation, `centered_out` (if given) receives the same
    /// permutation applied to the group-centred profiles. The bootstrap
    /// draws are already centred at zero and leave it untouched.
    ///
    /// # Panics
    ///
    /// Panics if `out` does not have the observed table's shape.
    pub fn draw_into<R: Rng>(
        &self,
        rng: &mut R,
        out: &mut SubjectTable,
        centered_out: Option<&mut SubjectTable>,
    ) {
        match self {
            NullModel::Permutation {
                pooled,
                pooled_centered,
            } => {
                assert_eq!(out.n_subjects(), pooled.nrows(), "output table shape mismatch");

                let mut order: Vec<usize> = (0..pooled.nrows()).collect();
                order.shuffle(rng);

                scatter_rows(pooled, &order, out);
                if let Some(centered) = centered_out {
                    scatter_rows(pooled_centered, &order, centered);
                }
            }
            NullModel::ParametricBootstrap { roots } => {
                assert_eq!(out.groups().len(), roots.len(), "output table shape mismatch");

                for (group, root) in out.groups_mut().iter_mut().zip(roots) {
                    let d = root.nrows();
                    for i in 0..group.nrows() {
                        let z = Vector::from_fn(d, |_, _| rng.sample::<f64, _>(StandardNormal));
                        group.row_mut(i).copy_from(&(root * z).transpose());
                    }
                }
            }
            NullModel::WildBootstrap { residuals } => {
                assert_eq!(out.group_sizes(), residuals.group_sizes(), "output table shape mismatch");

                for (group, source) in out.groups_mut().iter_mut().zip(residuals.groups()) {
                    for i in 0..group.nrows() {
                        let weight = if rng.random::<bool>() { 1.0 } else { -1.0 };
                        group.row_mut(i).copy_from(&(source.row(i) * weight));
                    }
                }
            }
        }
    }

    /// Draw one perturbed table, allocating the result.
    pub fn draw<R: Rng>(&self, rng: &mut R, template: &SubjectTable) -> SubjectTable {
        let mut out = template.clone();
        self.draw_into(rng, &mut out, None);
        out
    }
}

/// Stack every group's subjects into one matrix, groups in order.
fn stack_rows(table: &SubjectTable) -> Matrix {
    let d = table.n_repeated();
    let mut pooled = Matrix::zeros(table.n_subjects(), d);
    let mut offset = 0;
    for group in table.groups() {
        pooled.rows_mut(offset, group.nrows()).copy_from(group);
        offset += group.nrows();
    }
    pooled
}

/// Fill the groups of `out` with `pooled` rows in `order`, keeping group sizes.
fn scatter_rows(pooled: &Matrix, order: &[usize], out: &mut SubjectTable) {
    let mut next = order.iter();
    for group in out.groups_mut() {
        for (i, &source) in (0..group.nrows()).zip(next.by_ref()) {
            group.row_mut(i).copy_from(&pooled.row(source));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn table() -> SubjectTable {
        SubjectTable::from_groups(vec![
            Matrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            Matrix::from_row_slice(2, 2, &[10.0, 20.0, 30.0, 40.0]),
        ])
        .unwrap()
    }

    fn sorted_rows(table: &SubjectTable) -> Vec<(i64, i64)> {
        let mut rows: Vec<(i64, i64)> = table
            .groups()
            .iter()
            .flat_map(|g| g.row_iter().map(|r| (r[0] as i64, r[1] as i64)).collect::<Vec<_>>())
            .collect();
        rows.sort();
        rows
    }

    #[test]
    fn test_counter_seed_is_deterministic() {
        assert_eq!(counter_rng_seed(42, 7), counter_rng_seed(42, 7));
        assert_ne!(counter_rng_seed(42, 7), counter_rng_seed(42, 8));
        assert_ne!(counter_rng_seed(42, 7), counter_rng_seed(43, 7));
    }

    #[test]
    fn test_symmetric_sqrt_squares_back() {
        let v = Matrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let root = symmetric_sqrt(&v);
        assert!((&root * &root - &v).abs().max() < 1e-10);

        // Singular input stays well defined
        let singular = Matrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let root = symmetric_sqrt(&singular);
        assert!((&root * &root - &singular).abs().max() < 1e-10);
    }

    #[test]
    fn test_permutation_keeps_profiles_and_sizes() {
        let observed = table();
        let est = MomentEstimate::from_table(&observed);
        let model = NullModel::fit(ResamplingMethod::Permutation, &observed, &est);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);

        let drawn = model.draw(&mut rng, &observed);
        assert_eq!(drawn.group_sizes(), vec![3, 2]);
        assert_eq!(sorted_rows(&drawn), sorted_rows(&observed));
    }

    #[test]
    fn test_wild_bootstrap_flips_residual_signs() {
        let observed = table();
        let est = MomentEstimate::from_table(&observed);
        let model = NullModel::fit(ResamplingMethod::WildBootstrap, &observed, &est);
        let residuals = observed.centered();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);

        let drawn = model.draw(&mut rng, &observed);
        for (g, r) in drawn.groups().iter().zip(residuals.groups()) {
            for i in 0..g.nrows() {
                let plus = (g.row(i) - r.row(i)).abs().max() < 1e-12;
                let minus = (g.row(i) + r.row(i)).abs().max() < 1e-12;
                assert!(plus || minus, "row is not ± its residual");
            }
        }
    }

    #[test]
    fn test_parametric_bootstrap_shape_and_variability() {
        let observed = table();
        let est = MomentEstimate::from_table(&observed);
        let model = NullModel::fit(ResamplingMethod::ParametricBootstrap, &observed, &est);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);

        let first = model.draw(&mut rng, &observed);
        let second = model.draw(&mut rng, &observed);
        assert_eq!(first.group_sizes(), observed.group_sizes());
        assert_ne!(first, second);
        assert!(first.groups().iter().all(|g| g.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_same_seed_same_draw() {
        let observed = table();
        let est = MomentEstimate::from_table(&observed);
        for method in [
            ResamplingMethod::Permutation,
            ResamplingMethod::ParametricBootstrap,
            ResamplingMethod::WildBootstrap,
        ] {
            let model = NullModel::fit(method, &observed, &est);
            assert_eq!(model.method(), method);
            let a = model.draw(&mut Xoshiro256PlusPlus::seed_from_u64(counter_rng_seed(9, 4)), &observed);
            let b = model.draw(&mut Xoshiro256PlusPlus::seed_from_u64(counter_rng_seed(9, 4)), &observed);
            assert_eq!(a, b);
        }
    }
}
