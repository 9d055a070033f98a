//! Wald-type (WTS) and ANOVA-type (ATS) statistics.
//!
//! With `μ̂` the cell-mean vector, `Σ̂` the covariance of `μ̂` and `T` the
//! hypothesis projection:
//!
//! - `WTS = μ̂ᵀ T (T Σ̂ T)⁺ T μ̂`, asymptotically χ² with `rank(T)` degrees of
//!   freedom. This equals `N μ̂ᵀ T (T Ŝ_N T)⁺ T μ̂` for `Ŝ_N = N Σ̂`.
//! - `ATS = μ̂ᵀ T μ̂ / tr(T Σ̂)`, approximated by `F(f, f₀)` with
//!   `f = tr(TΣ̂)² / tr(TΣ̂TΣ̂)` and `f₀ = tr(TΣ̂)² / tr(D² Σ̂² Λ)`,
//!   `D = diag(T)` and `Λ = diag(1/(nᵢ − 1))` over the cells of group `i`
//!   (box-type approximation of Brunner, Dette & Munk; Friedrich, Brunner &
//!   Pauly 2017).
//!
//! Both statistics are scale free in `Σ̂`, so they can be computed from the
//! covariance of the mean vector directly. Evaluation is a pure function of
//! its inputs.

use std::fmt;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor};

use crate::hypothesis::Hypothesis;
use crate::statistics::MomentEstimate;
use crate::types::{Matrix, Vector};

/// Relative singular-value cutoff of the generalized inverse, `sqrt(f64::EPSILON)`.
///
/// Singular values of `TΣ̂T` below `GINV_TOLERANCE × σ_max` are treated as
/// zero. When that drops a direction inside the image of `T`, the WTS is
/// flagged as near-singular.
pub const GINV_TOLERANCE: f64 = 1.490_116_119_384_765_6e-8;

/// Non-fatal numerical problems attached to a statistic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NumericWarning {
    /// `TΣ̂T` is near-singular on the image of `T`; the WTS relies on a
    /// generalized inverse of an ill-conditioned matrix.
    NearSingular {
        /// Smallest retained singular value over the largest.
        ratio: f64,
    },
    /// `tr(TΣ̂)` is zero, so the ATS and its degrees of freedom are undefined.
    DegenerateTrace,
    /// A statistic evaluated to a non-finite value.
    NonFinite,
}

impl fmt::Display for NumericWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericWarning::NearSingular { ratio } => write!(
                f,
                "covariance estimate is near-singular (singular value ratio {:.2e}); the WTS may be unreliable, consider the ATS",
                ratio
            ),
            NumericWarning::DegenerateTrace => {
                write!(f, "trace of T·Σ̂ is zero; the ATS is undefined")
            }
            NumericWarning::NonFinite => write!(f, "statistic evaluated to a non-finite value"),
        }
    }
}

/// Wald-type statistic with its χ² reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaldType {
    /// Test statistic.
    pub statistic: f64,
    /// Degrees of freedom, `rank(T)`.
    pub df: usize,
    /// Asymptotic upper-tail p-value.
    pub p_value: f64,
}

/// ANOVA-type statistic with its F reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnovaType {
    /// Test statistic.
    pub statistic: f64,
    /// Estimated numerator degrees of freedom.
    pub df1: f64,
    /// Estimated denominator degrees of freedom.
    pub df2: f64,
    /// Upper-tail p-value of `F(df1, df2)`.
    pub p_value: f64,
}

/// Both statistics for one hypothesis and one moment estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticResult {
    /// Wald-type statistic.
    pub wts: WaldType,
    /// ANOVA-type statistic.
    pub ats: AnovaType,
    /// First numerical problem encountered, if any.
    pub warning: Option<NumericWarning>,
}

/// Evaluate WTS and ATS for an arbitrary hypothesis matrix.
///
/// `group_sizes` are the subject counts of the between-subject groups whose
/// blocks make up `covariance`. The rank of `hypothesis` is determined
/// numerically; use [`evaluate_hypothesis`] when it is known.
///
/// If `group_sizes` is empty or does not split the cells into equal blocks,
/// the ATS denominator degrees of freedom (and its p-value) are NaN and the
/// result carries [`NumericWarning::NonFinite`].
///
/// # Panics
///
/// Panics if `hypothesis`, `means` and `covariance` do not share the cell
/// dimension.
pub fn evaluate_statistics(
    hypothesis: &Matrix,
    means: &Vector,
    covariance: &Matrix,
    group_sizes: &[usize],
) -> StatisticResult {
    let df = hypothesis.rank(1e-9);
    evaluate_with_rank(hypothesis, df, means, covariance, group_sizes)
}

/// Evaluate WTS and ATS for a built hypothesis against a moment estimate.
pub fn evaluate_hypothesis(hypothesis: &Hypothesis, estimate: &MomentEstimate) -> StatisticResult {
    evaluate_with_rank(
        hypothesis.matrix(),
        hypothesis.df(),
        &estimate.means,
        &estimate.covariance,
        &estimate.group_sizes,
    )
}

fn evaluate_with_rank(
    t: &Matrix,
    df: usize,
    means: &Vector,
    covariance: &Matrix,
    group_sizes: &[usize],
) -> StatisticResult {
    let (wts, wts_warning) = wald_type(t, df, means, covariance);
    let (ats, ats_warning) = anova_type(t, means, covariance, group_sizes);

    StatisticResult {
        wts,
        ats,
        warning: wts_warning.or(ats_warning),
    }
}

pub(crate) fn wald_type(t: &Matrix, df: usize, means: &Vector, covariance: &Matrix) -> (WaldType, Option<NumericWarning>) {
    let tm = t * means;
    let tst = t * covariance * t.transpose();

    let svd = tst.svd(true, true);
    let mut singular: Vec<f64> = svd.singular_values.iter().copied().collect();
    singular.sort_by(|a, b| b.total_cmp(a));
    let largest = singular.first().copied().unwrap_or(0.0);

    let mut warning = None;
    if df > 0 {
        let retained = singular.get(df - 1).copied().unwrap_or(0.0);
        let ratio = if largest > 0.0 { retained / largest } else { 0.0 };
        if ratio < GINV_TOLERANCE {
            warning = Some(NumericWarning::NearSingular { ratio });
        }
    }

    let statistic = match svd.pseudo_inverse(largest * GINV_TOLERANCE) {
        // Rounding can push the quadratic form of a PSD matrix slightly below 0
        Ok(pinv) => tm.dot(&(pinv * &tm)).max(0.0),
        Err(_) => f64::NAN,
    };
    if !statistic.is_finite() {
        warning = Some(NumericWarning::NonFinite);
    }

    let p_value = match ChiSquared::new(df as f64) {
        Ok(chi2) if statistic.is_finite() => chi2.sf(statistic),
        _ => f64::NAN,
    };

    (
        WaldType {
            statistic,
            df,
            p_value,
        },
        warning,
    )
}

fn anova_type(
    t: &Matrix,
    means: &Vector,
    covariance: &Matrix,
    group_sizes: &[usize],
) -> (AnovaType, Option<NumericWarning>) {
    let ts = t * covariance;
    let spur = ts.trace();

    if !spur.is_finite() || spur <= 0.0 {
        let undefined = AnovaType {
            statistic: f64::NAN,
            df1: f64::NAN,
            df2: f64::NAN,
            p_value: f64::NAN,
        };
        return (undefined, Some(NumericWarning::DegenerateTrace));
    }

    let statistic = (means.dot(&(t * means)) / spur).max(0.0);
    let df1 = spur * spur / (&ts * &ts).trace();

    let df2 = match block_size(means.len(), group_sizes) {
        Some(block) => {
            // tr(D² Σ̂² Λ) for diagonal D and Λ: Σⱼ Dⱼⱼ² (Σ̂²)ⱼⱼ Λⱼⱼ
            let denominator: f64 = (0..means.len())
                .map(|j| {
                    let n_i = group_sizes[j / block] as f64;
                    let d = t[(j, j)];
                    d * d * covariance.row(j).norm_squared() / (n_i - 1.0)
                })
                .sum();
            spur * spur / denominator
        }
        None => f64::NAN,
    };

    let p_value = if df2.is_nan() {
        f64::NAN
    } else if df2.is_infinite() {
        // F(f, ∞) is χ²(f)/f
        ChiSquared::new(df1).map(|chi2| chi2.sf(df1 * statistic)).unwrap_or(f64::NAN)
    } else {
        FisherSnedecor::new(df1, df2)
            .map(|f| f.sf(statistic))
            .unwrap_or(f64::NAN)
    };

    let warning = if statistic.is_finite() && df1.is_finite() && !df2.is_nan() {
        None
    } else {
        Some(NumericWarning::NonFinite)
    };

    (
        AnovaType {
            statistic,
            df1,
            df2,
            p_value,
        },
        warning,
    )
}

/// Cells per group, if `group_sizes` splits `n_cells` into equal blocks.
fn block_size(n_cells: usize, group_sizes: &[usize]) -> Option<usize> {
    if group_sizes.is_empty() || n_cells == 0 || n_cells % group_sizes.len() != 0 {
        return None;
    }
    Some(n_cells / group_sizes.len())
}
