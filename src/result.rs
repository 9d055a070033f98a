//! Analysis result types.

use serde::{Deserialize, Serialize};

use crate::analysis::{AnovaType, CellSummary, NumericWarning, WaldType};
use crate::config::{CiMethod, ResamplingMethod};

/// Complete result of a repeated-measures analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// One entry per tested effect, in formula order.
    pub effects: Vec<EffectResult>,

    /// Per-cell summaries in canonical cell order.
    pub descriptive: Vec<CellSummary>,

    /// Problems that did not abort the run (singular covariance estimates,
    /// degenerate repetitions, unreliable permutation tests).
    pub warnings: Vec<String>,

    /// Metadata for reporting and reproduction.
    pub metadata: Metadata,
}

impl AnalysisResult {
    /// Result of the effect named `name` (factor names joined with `:`).
    pub fn effect(&self, name: &str) -> Option<&EffectResult> {
        self.effects.iter().find(|e| e.name == name)
    }
}

/// Statistics of one tested effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectResult {
    /// Effect name, e.g. `"group:time"`.
    pub name: String,

    /// Names of the factors the effect involves.
    pub factors: Vec<String>,

    /// Wald-type statistic with its χ² p-value.
    pub wts: WaldType,

    /// ANOVA-type statistic with its F p-value.
    pub ats: AnovaType,

    /// Resampling p-value of the WTS.
    pub resampling_p_wts: f64,

    /// Resampling p-value of the ATS; only the wild bootstrap provides one.
    pub resampling_p_ats: Option<f64>,

    /// Numerical problem in the observed statistics, if any.
    pub numeric_warning: Option<NumericWarning>,
}

/// Metadata for reporting and reproduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Total number of subjects.
    pub n_subjects: usize,
    /// Subjects per between-subject group.
    pub group_sizes: Vec<usize>,
    /// Resampling repetitions.
    pub iterations: usize,
    /// Resampling scheme.
    pub resampling: ResamplingMethod,
    /// Construction of the descriptive confidence intervals.
    pub ci_method: CiMethod,
    /// Base seed of the resampling run.
    pub seed: u64,
    /// Largest share of resampling repetitions with a degenerate covariance
    /// estimate, over all effects.
    pub degenerate_fraction: f64,
    /// Total runtime in seconds.
    pub runtime_secs: f64,
}
