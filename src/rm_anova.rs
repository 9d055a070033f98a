//! Main `RmAnova` entry point and builder.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use crate::analysis::{describe, evaluate_hypothesis, StatisticResult};
use crate::config::{CiMethod, Config, ResamplingMethod};
use crate::design::Design;
use crate::error::Result;
use crate::hypothesis::{build_hypothesis_matrices, EffectSpec, Hypothesis};
use crate::resampling::engine::warn_if_not_exchangeable;
use crate::resampling::{ResamplingConfig, ResamplingEngine};
use crate::result::{AnalysisResult, EffectResult, Metadata};
use crate::sample::Sample;
use crate::statistics::MomentEstimate;

/// Repeated-measures analysis of a factorial design.
///
/// Use the builder pattern to configure and run an analysis.
///
/// # Example
///
/// ```ignore
/// use rm_anova::{Design, Factor, RmAnova, ResamplingMethod};
///
/// let design = Design::new(vec![
///     Factor::between("group", 2),
///     Factor::within("time", 4),
/// ])?;
///
/// let result = RmAnova::new(design)
///     .iterations(5_000)
///     .resampling(ResamplingMethod::WildBootstrap)
///     .seed(2024)
///     .run(&sample)?;
///
/// let group = result.effect("group").unwrap();
/// assert!(group.resampling_p_wts <= 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct RmAnova {
    design: Design,
    effects: EffectSpec,
    config: Config,
    cancel: Option<Arc<AtomicBool>>,
}

impl RmAnova {
    /// Create with default configuration and the full factorial set of effects.
    pub fn new(design: Design) -> Self {
        Self {
            design,
            effects: EffectSpec::Full,
            config: Config::default(),
            cancel: None,
        }
    }

    /// Create with a reduced number of repetitions for exploration and tests.
    ///
    /// Settings:
    /// - 1,000 resampling repetitions (vs 10,000 default)
    pub fn quick(design: Design) -> Self {
        Self::new(design).iterations(1_000)
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Choose which effects to test.
    pub fn effects(mut self, effects: EffectSpec) -> Self {
        self.effects = effects;
        self
    }

    /// Set resampling repetitions.
    pub fn iterations(mut self, n: usize) -> Self {
        self.config.iterations = n;
        self
    }

    /// Set the significance level of the confidence intervals.
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.config.alpha = alpha;
        self
    }

    /// Set the resampling scheme.
    pub fn resampling(mut self, method: ResamplingMethod) -> Self {
        self.config.resampling = method;
        self
    }

    /// Set how descriptive confidence intervals are built.
    pub fn ci_method(mut self, method: CiMethod) -> Self {
        self.config.ci_method = method;
        self
    }

    /// Set the base seed of the resampling run.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Set the number of worker threads.
    pub fn parallelism(mut self, threads: usize) -> Self {
        self.config.parallelism = Some(threads);
        self
    }

    /// Abort the resampling loop once `flag` is set.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Get the current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The design under analysis.
    pub fn design(&self) -> &Design {
        &self.design
    }

    /// Run the analysis on a long-format sample.
    ///
    /// Configuration and data problems are reported before any resampling
    /// starts. Numerical problems are attached to the affected effects and
    /// listed in [`AnalysisResult::warnings`].
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`](crate::Error::Configuration) for invalid
    ///   settings or effect lists
    /// - [`Error::Data`](crate::Error::Data) when the sample does not fit
    ///   the design
    /// - [`Error::Cancelled`](crate::Error::Cancelled) when the cancel flag
    ///   interrupts resampling
    pub fn run(&self, sample: &Sample) -> Result<AnalysisResult> {
        let start_time = Instant::now();
        self.config.validate()?;

        let hypotheses = build_hypothesis_matrices(&self.design, &self.effects)?;
        let table = sample.arrange(&self.design)?;
        let estimate = MomentEstimate::from_table(&table);

        let tested: Vec<&Hypothesis> = hypotheses.tested().collect();
        let mut warnings = Vec::new();

        let observed: Vec<StatisticResult> = tested
            .iter()
            .map(|h| {
                let result = evaluate_hypothesis(h, &estimate);
                if let Some(warning) = result.warning {
                    tracing::warn!(effect = h.name(), "{}", warning);
                    warnings.push(format!("{}: {}", h.name(), warning));
                }
                result
            })
            .collect();

        for hypothesis in &tested {
            if let Some(warning) =
                warn_if_not_exchangeable(&self.design, hypothesis, self.config.resampling)
            {
                warnings.push(warning);
            }
        }

        let resampling_config = ResamplingConfig {
            confidence_quantile: self.config.ci_method == CiMethod::Resampling,
            cancel: self.cancel.clone(),
            ..ResamplingConfig::from_config(&self.config)
        };
        let engine = ResamplingEngine::new(&table, &estimate, &resampling_config)?;
        let run = engine.run(&tested, &observed)?;
        warnings.extend(run.warnings.iter().cloned());

        // An undefined resampling quantile yields NaN limits; the run has
        // already recorded why.
        let quantile = match self.config.ci_method {
            CiMethod::Resampling => run.confidence_quantile.or(Some(f64::NAN)),
            CiMethod::TQuantile => None,
        };
        let descriptive = describe(
            &self.design,
            &estimate,
            self.config.alpha,
            self.config.ci_method,
            quantile,
        )?;

        let effects = tested
            .iter()
            .zip(observed)
            .zip(&run.outcomes)
            .map(|((hypothesis, stat), outcome)| EffectResult {
                name: hypothesis.name().to_string(),
                factors: hypothesis
                    .factors()
                    .iter()
                    .map(|&f| self.design.factors()[f].name.clone())
                    .collect(),
                wts: stat.wts,
                ats: stat.ats,
                resampling_p_wts: outcome.p_wts,
                resampling_p_ats: outcome.p_ats,
                numeric_warning: stat.warning,
            })
            .collect();

        let runtime_secs = start_time.elapsed().as_secs_f64();
        tracing::debug!(
            effects = tested.len(),
            iterations = run.iterations,
            runtime_secs,
            "analysis complete"
        );

        Ok(AnalysisResult {
            effects,
            descriptive,
            warnings,
            metadata: Metadata {
                n_subjects: estimate.n_subjects(),
                group_sizes: estimate.group_sizes.clone(),
                iterations: run.iterations,
                resampling: self.config.resampling,
                ci_method: self.config.ci_method,
                seed: self.config.effective_seed(),
                degenerate_fraction: run.degenerate_fraction,
                runtime_secs,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Factor;
    use crate::error::Error;

    fn design() -> Design {
        Design::new(vec![Factor::between("group", 2), Factor::within("time", 2)]).unwrap()
    }

    fn sample() -> Sample {
        // Subjects 1-3 in group 0, 4-6 in group 1; cells g*2 + t
        let rows: [(u64, usize, f64); 12] = [
            (1, 0, 1.0), (1, 1, 1.6), (2, 0, 2.0), (2, 1, 2.1), (3, 0, 0.5), (3, 1, 1.4),
            (4, 2, 2.5), (4, 3, 3.9), (5, 2, 3.1), (5, 3, 3.0), (6, 2, 1.8), (6, 3, 2.9),
        ];
        Sample::new(
            rows.iter().map(|r| r.2).collect(),
            rows.iter().map(|r| r.0).collect(),
            rows.iter().map(|r| r.1).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_builder_sets_config() {
        let analysis = RmAnova::new(design())
            .iterations(250)
            .alpha(0.1)
            .resampling(ResamplingMethod::ParametricBootstrap)
            .ci_method(CiMethod::Resampling)
            .seed(11)
            .parallelism(2);
        let config = analysis.config();
        assert_eq!(config.iterations, 250);
        assert_eq!(config.alpha, 0.1);
        assert_eq!(config.resampling, ResamplingMethod::ParametricBootstrap);
        assert_eq!(config.ci_method, CiMethod::Resampling);
        assert_eq!(config.seed, Some(11));
        assert_eq!(config.parallelism, Some(2));
        assert_eq!(RmAnova::quick(design()).config().iterations, 1_000);
    }

    #[test]
    fn test_run_reports_every_effect() {
        let result = RmAnova::new(design()).iterations(100).run(&sample()).unwrap();
        let names: Vec<&str> = result.effects.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["group", "time", "group:time"]);
        assert_eq!(result.effect("group:time").unwrap().factors, vec!["group", "time"]);
        assert_eq!(result.descriptive.len(), 4);
        assert_eq!(result.metadata.n_subjects, 6);
        assert_eq!(result.metadata.group_sizes, vec![3, 3]);
        assert_eq!(result.metadata.seed, Config::DEFAULT_SEED);
        assert!(result.effects.iter().all(|e| e.resampling_p_ats.is_some()));
    }

    #[test]
    fn test_invalid_config_fails_before_data() {
        let err = RmAnova::new(design()).iterations(0).run(&sample()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_permutation_flags_within_effects() {
        let result = RmAnova::new(design())
            .iterations(50)
            .resampling(ResamplingMethod::Permutation)
            .run(&sample())
            .unwrap();
        assert!(result.warnings.iter().any(|w| w.starts_with("time: permutation")));
        assert!(result.warnings.iter().any(|w| w.starts_with("group:time: permutation")));
        assert!(!result.warnings.iter().any(|w| w.starts_with("group: permutation")));
        assert!(result.effects.iter().all(|e| e.resampling_p_ats.is_none()));
    }

    #[test]
    fn test_resampling_confidence_intervals_are_finite() {
        let t = RmAnova::new(design()).iterations(200).run(&sample()).unwrap();
        let r = RmAnova::new(design())
            .iterations(200)
            .ci_method(CiMethod::Resampling)
            .run(&sample())
            .unwrap();
        for (a, b) in t.descriptive.iter().zip(&r.descriptive) {
            assert_eq!(a.mean, b.mean);
            assert!(b.lower.is_finite() && b.upper.is_finite());
        }
    }
}
