//! Per-cell descriptive summaries with confidence intervals.
//!
//! Two interval constructions are available:
//!
//! - [`CiMethod::TQuantile`]: `x̄ ± t(nᵢ − 1; 1 − α/2) · sqrt(v / nᵢ)`, one
//!   interval per cell.
//! - [`CiMethod::Resampling`]: `x̄ ± sqrt(q · v / nᵢ)` where `q` is the
//!   `1 − α` quantile of the resampled Wald-type statistic for "all cell
//!   means are zero". Projecting that confidence ellipsoid onto each
//!   coordinate gives simultaneous intervals for all cells.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::config::CiMethod;
use crate::design::Design;
use crate::error::{Error, Result};
use crate::statistics::MomentEstimate;

/// Summary of one design cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSummary {
    /// Level index of every factor, canonical order.
    pub levels: Vec<usize>,
    /// Subjects contributing to the cell.
    pub n: usize,
    /// Cell mean.
    pub mean: f64,
    /// Unbiased variance of the subject-level responses.
    pub variance: f64,
    /// Lower confidence limit.
    pub lower: f64,
    /// Upper confidence limit.
    pub upper: f64,
}

/// Summaries for every cell in canonical order.
///
/// `resampling_quantile` is required for [`CiMethod::Resampling`] and ignored
/// otherwise.
///
/// # Errors
///
/// [`Error::Configuration`] when resampling intervals are requested without
/// a quantile, or `alpha` is outside (0, 1).
pub fn describe(
    design: &Design,
    estimate: &MomentEstimate,
    alpha: f64,
    method: CiMethod,
    resampling_quantile: Option<f64>,
) -> Result<Vec<CellSummary>> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(Error::config(format!("alpha must be in (0, 1), got {}", alpha)));
    }
    let quantile = match method {
        CiMethod::Resampling => Some(resampling_quantile.ok_or_else(|| {
            Error::config("resampling confidence intervals need a resampled quantile")
        })?),
        CiMethod::TQuantile => None,
    };

    let block = estimate.block_size();
    let summaries = (0..estimate.means.len())
        .map(|cell| {
            let group = cell / block;
            let slot = cell % block;
            let n = estimate.group_sizes[group];
            let mean = estimate.means[cell];
            let variance = estimate.group_covariances[group][(slot, slot)];
            let standard_error = (variance / n as f64).sqrt();

            let half_width = match quantile {
                Some(q) => (q * variance / n as f64).sqrt(),
                None => t_quantile(n - 1, 1.0 - alpha / 2.0) * standard_error,
            };

            CellSummary {
                levels: design.cell_levels(cell),
                n,
                mean,
                variance,
                lower: mean - half_width,
                upper: mean + half_width,
            }
        })
        .collect();

    Ok(summaries)
}

fn t_quantile(df: usize, p: f64) -> f64 {
    StudentsT::new(0.0, 1.0, df as f64)
        .map(|t| t.inverse_cdf(p))
        .unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Factor;
    use crate::sample::SubjectTable;
    use crate::types::Matrix;

    fn setup() -> (Design, MomentEstimate) {
        let design = Design::new(vec![Factor::between("g", 2), Factor::within("t", 2)]).unwrap();
        let table = SubjectTable::from_groups(vec![
            Matrix::from_row_slice(4, 2, &[1.0, 2.0, 2.0, 3.0, 3.0, 5.0, 4.0, 6.0]),
            Matrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 2.0, 2.0, 1.0]),
        ])
        .unwrap();
        (design, MomentEstimate::from_table(&table))
    }

    #[test]
    fn test_t_intervals() {
        let (design, est) = setup();
        let cells = describe(&design, &est, 0.05, CiMethod::TQuantile, None).unwrap();
        assert_eq!(cells.len(), 4);

        let first = &cells[0];
        assert_eq!(first.levels, vec![0, 0]);
        assert_eq!(first.n, 4);
        assert!((first.mean - 2.5).abs() < 1e-12);
        // var(1,2,3,4) = 5/3, t(3; 0.975) = 3.182446
        let half = 3.182_446_305_284_263 * (5.0 / 3.0 / 4.0f64).sqrt();
        assert!((first.upper - (2.5 + half)).abs() < 1e-6);
        assert!((first.lower - (2.5 - half)).abs() < 1e-6);

        assert_eq!(cells[3].levels, vec![1, 1]);
        assert_eq!(cells[3].n, 3);
    }

    #[test]
    fn test_resampling_intervals_use_quantile() {
        let (design, est) = setup();
        let cells = describe(&design, &est, 0.05, CiMethod::Resampling, Some(9.0)).unwrap();
        let first = &cells[0];
        let half = (9.0 * first.variance / 4.0).sqrt();
        assert!((first.upper - first.mean - half).abs() < 1e-12);
    }

    #[test]
    fn test_resampling_intervals_need_quantile() {
        let (design, est) = setup();
        let err = describe(&design, &est, 0.05, CiMethod::Resampling, None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
