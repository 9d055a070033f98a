//! Test statistics and per-cell summaries.
//!
//! 1. **Statistics** ([`statistic`]): Wald-type and ANOVA-type statistics
//!    with their asymptotic p-values
//! 2. **Descriptives** ([`descriptive`]): cell means, variances and
//!    confidence intervals

pub mod descriptive;
pub mod statistic;

pub use descriptive::{describe, CellSummary};
pub(crate) use statistic::wald_type;
pub use statistic::{
    evaluate_hypothesis, evaluate_statistics, AnovaType, NumericWarning, StatisticResult,
    WaldType, GINV_TOLERANCE,
};
