//! # rm-anova
//!
//! Wald-type and ANOVA-type statistics for repeated-measures and
//! multivariate factorial designs, with resampling p-values.
//!
//! The methods do not assume normal data or equal covariance matrices
//! across groups. For every effect of a crossed factorial design the crate
//! reports:
//! - The Wald-type statistic (WTS) with its asymptotic χ² p-value
//! - The ANOVA-type statistic (ATS) with its F approximation
//! - A resampling p-value from a permutation, parametric bootstrap or wild
//!   bootstrap approximation of the null distribution
//!
//! ## Data layout
//!
//! Observations are given in long format: one response per (subject, cell)
//! pair, where a cell is a combination of factor levels. Between-subject
//! factors split subjects into independent groups; within-subject factors
//! index the repeated measurements of every subject. Cells are numbered in
//! canonical order (between-subject factors first, last factor fastest);
//! [`Design::cell_index`] converts level combinations.
//!
//! ## Quick Start
//!
//! ```ignore
//! use rm_anova::{Design, Factor, RmAnova, Sample};
//!
//! let design = Design::new(vec![
//!     Factor::between("group", 2),
//!     Factor::within("time", 3),
//! ])?;
//! let sample = Sample::new(responses, subject_ids, cells)?;
//!
//! let result = RmAnova::new(design).seed(1).run(&sample)?;
//! for effect in &result.effects {
//!     println!("{}: WTS p = {:.4}, resampling p = {:.4}",
//!         effect.name, effect.wts.p_value, effect.resampling_p_wts);
//! }
//! ```
//!
//! ## Feature flags
//!
//! - `parallel` (default): run resampling repetitions on a rayon pool.
//!   Results are identical with and without it for the same seed.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
mod config;
mod design;
mod error;
mod hypothesis;
mod result;
mod rm_anova;
mod sample;
mod thread_pool;
mod types;

// Functional modules
pub mod analysis;
pub mod resampling;
pub mod statistics;

// Re-exports for public API
pub use analysis::{
    evaluate_statistics, AnovaType, CellSummary, NumericWarning, StatisticResult, WaldType,
};
pub use config::{CiMethod, Config, ResamplingMethod};
pub use design::{Design, Factor, FactorKind};
pub use error::{Error, Result};
pub use hypothesis::{
    build_hypothesis_matrices, centering_matrix, effect_matrix, identity_hypothesis, EffectSpec,
    Hypothesis, HypothesisSet,
};
pub use resampling::{resample, ResamplingConfig, ResamplingEngine, ResamplingOutcome};
pub use result::{AnalysisResult, EffectResult, Metadata};
pub use rm_anova::RmAnova;
pub use sample::{Sample, SubjectTable};
pub use statistics::{estimate_moments, MomentEstimate};
pub use types::{Matrix, Vector};
