//! The resampling loop.
//!
//! One run perturbs the observed subject table `iterations` times. Every
//! perturbed table is reused for all hypotheses: its moments are estimated
//! once and each hypothesis' WTS (and, for the wild bootstrap, ATS) is
//! recorded. Repetition `r` seeds its own generator from
//! `counter_rng_seed(seed, r)` and writes into slot `r` of a fixed buffer,
//! so the result is identical for any worker count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::analysis::{evaluate_hypothesis, wald_type, StatisticResult};
use crate::config::{Config, ResamplingMethod};
use crate::design::Design;
use crate::error::{Error, Result};
use crate::hypothesis::Hypothesis;
use crate::sample::{Sample, SubjectTable};
use crate::statistics::{compute_quantile, upper_tail_p_value, MomentEstimate};
use crate::types::Matrix;

use super::perturb::{counter_rng_seed, NullModel};

/// Share of numerically degenerate repetitions above which a run is flagged.
pub const DEGENERATE_WARNING_FRACTION: f64 = 0.05;

/// Settings for one resampling run.
#[derive(Debug, Clone)]
pub struct ResamplingConfig {
    /// Resampling scheme.
    pub method: ResamplingMethod,
    /// Number of repetitions.
    pub iterations: usize,
    /// Base seed; `None` uses [`Config::DEFAULT_SEED`].
    pub seed: Option<u64>,
    /// Worker threads; `None` uses every available core.
    pub parallelism: Option<usize>,
    /// Level for the confidence quantile.
    pub alpha: f64,
    /// Whether to compute the confidence quantile of the identity hypothesis.
    pub confidence_quantile: bool,
    /// Checked before every repetition; once set the run stops.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ResamplingConfig {
    /// Resampling settings of an analysis configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            method: config.resampling,
            iterations: config.iterations,
            seed: config.seed,
            parallelism: config.parallelism,
            alpha: config.alpha,
            confidence_quantile: false,
            cancel: None,
        }
    }

    fn validate(&self) -> Result<()> {
        Config {
            iterations: self.iterations,
            alpha: self.alpha,
            resampling: self.method,
            parallelism: self.parallelism,
            seed: self.seed,
            ..Config::default()
        }
        .validate()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Finite resampled statistics of one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResamplingDistribution {
    /// Resampled Wald-type statistics.
    pub wts: Vec<f64>,
    /// Resampled ANOVA-type statistics, when the method supports them.
    pub ats: Option<Vec<f64>>,
    /// Repetitions skipped because their statistic was not finite.
    pub degenerate: usize,
    /// Repetitions whose covariance estimate was numerically degenerate
    /// (near-singular, zero trace or non-finite statistic). Finite flagged
    /// statistics stay in the distribution.
    pub flagged: usize,
}

/// Resampling result for one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResamplingOutcome {
    /// Effect name.
    pub effect: String,
    /// The resampled statistics.
    pub distribution: ResamplingDistribution,
    /// Resampling p-value of the WTS.
    pub p_wts: f64,
    /// Resampling p-value of the ATS (wild bootstrap only).
    pub p_ats: Option<f64>,
    /// Problems with this hypothesis: observed numerical warnings,
    /// unreliable permutation nulls, degenerate repetitions.
    pub warnings: Vec<String>,
}

/// Result of a full resampling run over several hypotheses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResamplingRun {
    /// One outcome per hypothesis, in input order.
    pub outcomes: Vec<ResamplingOutcome>,
    /// `1 − α` quantile of the resampled identity-hypothesis WTS, if requested.
    pub confidence_quantile: Option<f64>,
    /// Repetitions performed.
    pub iterations: usize,
    /// Largest share of flagged repetitions over all hypotheses.
    pub degenerate_fraction: f64,
    /// Human-readable problems encountered during the run.
    pub warnings: Vec<String>,
}

/// Statistics recorded by one repetition.
#[derive(Debug, Clone)]
struct Repetition {
    wts: Vec<f64>,
    ats: Vec<f64>,
    flagged: Vec<bool>,
    identity: f64,
}

/// Resampling engine bound to one observed table.
#[derive(Debug)]
pub struct ResamplingEngine<'a> {
    table: &'a SubjectTable,
    model: NullModel,
    config: &'a ResamplingConfig,
    identity: Matrix,
}

impl<'a> ResamplingEngine<'a> {
    /// Fit the configured null model to the observed data.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for invalid iterations, alpha or worker count.
    pub fn new(
        table: &'a SubjectTable,
        estimate: &MomentEstimate,
        config: &'a ResamplingConfig,
    ) -> Result<Self> {
        config.validate()?;
        let n_cells = table.n_cells();
        Ok(Self {
            table,
            model: NullModel::fit(config.method, table, estimate),
            config,
            identity: Matrix::identity(n_cells, n_cells),
        })
    }

    /// Run all repetitions and compute p-values against `observed`.
    ///
    /// `observed[h]` must be the statistic of `hypotheses[h]` on the
    /// observed data.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if the cancel flag was raised before every
    /// repetition finished, or a pool construction error.
    pub fn run(
        &self,
        hypotheses: &[&Hypothesis],
        observed: &[StatisticResult],
    ) -> Result<ResamplingRun> {
        debug_assert_eq!(hypotheses.len(), observed.len());

        let iterations = self.config.iterations;
        let base_seed = self.config.seed.unwrap_or(Config::DEFAULT_SEED);
        let with_centered = self.config.confidence_quantile
            && self.config.method == ResamplingMethod::Permutation;

        tracing::debug!(
            method = %self.config.method,
            iterations,
            hypotheses = hypotheses.len(),
            "starting resampling"
        );

        #[cfg(feature = "parallel")]
        let results: Vec<Option<Repetition>> =
            crate::thread_pool::install(self.config.parallelism, || {
                let mut out: Vec<Option<Repetition>> = vec![None; iterations];

                out.par_iter_mut().enumerate().for_each_init(
                    || {
                        // Per-thread scratch tables
                        (self.table.clone(), with_centered.then(|| self.table.clone()))
                    },
                    |(scratch, centered), (i, slot)| {
                        if self.config.is_cancelled() {
                            return;
                        }
                        *slot = Some(self.repetition(
                            base_seed,
                            i,
                            hypotheses,
                            scratch,
                            centered.as_mut(),
                        ));
                    },
                );

                out
            })?;

        #[cfg(not(feature = "parallel"))]
        let results: Vec<Option<Repetition>> = {
            let mut out: Vec<Option<Repetition>> = vec![None; iterations];
            let mut scratch = self.table.clone();
            let mut centered = with_centered.then(|| self.table.clone());

            for (i, slot) in out.iter_mut().enumerate() {
                if self.config.is_cancelled() {
                    break;
                }
                *slot = Some(self.repetition(
                    base_seed,
                    i,
                    hypotheses,
                    &mut scratch,
                    centered.as_mut(),
                ));
            }

            out
        };

        let completed = results.iter().filter(|r| r.is_some()).count();
        if completed < iterations {
            return Err(Error::Cancelled {
                completed,
                requested: iterations,
            });
        }
        let repetitions: Vec<Repetition> = results.into_iter().flatten().collect();

        Ok(self.summarize(hypotheses, observed, &repetitions))
    }

    fn repetition(
        &self,
        base_seed: u64,
        index: usize,
        hypotheses: &[&Hypothesis],
        scratch: &mut SubjectTable,
        mut centered: Option<&mut SubjectTable>,
    ) -> Repetition {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(counter_rng_seed(base_seed, index as u64));
        self.model.draw_into(&mut rng, scratch, centered.as_deref_mut());

        let estimate = MomentEstimate::from_table(scratch);
        let resample_ats = self.config.method.resamples_ats();

        let mut wts = Vec::with_capacity(hypotheses.len());
        let mut ats = Vec::with_capacity(if resample_ats { hypotheses.len() } else { 0 });
        let mut flagged = Vec::with_capacity(hypotheses.len());
        for hypothesis in hypotheses {
            let result = evaluate_hypothesis(hypothesis, &estimate);
            wts.push(result.wts.statistic);
            flagged.push(result.warning.is_some());
            if resample_ats {
                ats.push(result.ats.statistic);
            }
        }

        let identity = match centered {
            _ if !self.config.confidence_quantile => f64::NAN,
            // Permuted group-centred profiles
            Some(table) => self.identity_statistic(&MomentEstimate::from_table(table)),
            // Bootstrap draws are centred already
            None => self.identity_statistic(&estimate),
        };

        Repetition {
            wts,
            ats,
            flagged,
            identity,
        }
    }

    fn identity_statistic(&self, estimate: &MomentEstimate) -> f64 {
        let (wald, _) = wald_type(
            &self.identity,
            self.identity.nrows(),
            &estimate.means,
            &estimate.covariance,
        );
        wald.statistic
    }

    fn summarize(
        &self,
        hypotheses: &[&Hypothesis],
        observed: &[StatisticResult],
        repetitions: &[Repetition],
    ) -> ResamplingRun {
        let iterations = repetitions.len();
        let resample_ats = self.config.method.resamples_ats();
        let mut warnings = Vec::new();
        let mut worst_fraction = 0.0_f64;

        let outcomes = hypotheses
            .iter()
            .zip(observed)
            .enumerate()
            .map(|(h, (hypothesis, obs))| {
                let wts: Vec<f64> = repetitions
                    .iter()
                    .map(|r| r.wts[h])
                    .filter(|t| t.is_finite())
                    .collect();
                let degenerate = iterations - wts.len();
                let p_wts = upper_tail_p_value(&wts, obs.wts.statistic);

                let (ats, p_ats) = if resample_ats {
                    let ats: Vec<f64> = repetitions
                        .iter()
                        .map(|r| r.ats[h])
                        .filter(|t| t.is_finite())
                        .collect();
                    let p = upper_tail_p_value(&ats, obs.ats.statistic);
                    (Some(ats), Some(p))
                } else {
                    (None, None)
                };

                let flagged = repetitions
                    .iter()
                    .filter(|r| r.flagged[h] || !r.wts[h].is_finite())
                    .count();
                let fraction = flagged as f64 / iterations.max(1) as f64;
                worst_fraction = worst_fraction.max(fraction);

                let mut outcome_warnings = Vec::new();
                if fraction > DEGENERATE_WARNING_FRACTION {
                    tracing::warn!(
                        effect = hypothesis.name(),
                        flagged,
                        degenerate,
                        iterations,
                        "many resampling repetitions had a degenerate covariance estimate"
                    );
                    let warning = format!(
                        "{}: {} of {} resampling repetitions had a degenerate covariance estimate ({} skipped)",
                        hypothesis.name(),
                        flagged,
                        iterations,
                        degenerate
                    );
                    warnings.push(warning.clone());
                    outcome_warnings.push(warning);
                }

                ResamplingOutcome {
                    effect: hypothesis.name().to_string(),
                    distribution: ResamplingDistribution {
                        wts,
                        ats,
                        degenerate,
                        flagged,
                    },
                    p_wts,
                    p_ats,
                    warnings: outcome_warnings,
                }
            })
            .collect();

        let confidence_quantile = if self.config.confidence_quantile {
            let mut identity: Vec<f64> = repetitions
                .iter()
                .map(|r| r.identity)
                .filter(|t| t.is_finite())
                .collect();
            if identity.is_empty() {
                warnings.push("resampling confidence quantile is undefined".to_string());
                None
            } else {
                Some(compute_quantile(&mut identity, 1.0 - self.config.alpha))
            }
        } else {
            None
        };

        ResamplingRun {
            outcomes,
            confidence_quantile,
            iterations,
            degenerate_fraction: worst_fraction,
            warnings,
        }
    }
}

/// Log when permuting subjects does not reproduce the null of an effect.
///
/// Shuffling whole subject profiles across groups only mimics the null of
/// effects built from between-subject factors alone.
pub(crate) fn warn_if_not_exchangeable(
    design: &Design,
    hypothesis: &Hypothesis,
    method: ResamplingMethod,
) -> Option<String> {
    if method != ResamplingMethod::Permutation || design.is_between_effect(hypothesis.factors()) {
        return None;
    }
    tracing::warn!(
        effect = hypothesis.name(),
        "permutation resampling is not null-consistent for effects involving a within-subject factor"
    );
    Some(format!(
        "{}: permutation p-value is unreliable for effects involving a within-subject factor",
        hypothesis.name()
    ))
}

/// Resample a single hypothesis on a long-format sample.
///
/// Numerical warnings of the observed statistic and permutation caveats are
/// returned in [`ResamplingOutcome::warnings`] along with the run's own.
///
/// # Errors
///
/// Data errors from arranging `sample` under `design`, configuration errors
/// from `config`, and [`Error::Cancelled`].
pub fn resample(
    sample: &Sample,
    design: &Design,
    hypothesis: &Hypothesis,
    config: &ResamplingConfig,
) -> Result<ResamplingOutcome> {
    let table = sample.arrange(design)?;
    let estimate = MomentEstimate::from_table(&table);
    let observed = evaluate_hypothesis(hypothesis, &estimate);

    let mut warnings = Vec::new();
    if let Some(warning) = observed.warning {
        tracing::warn!(effect = hypothesis.name(), "{}", warning);
        warnings.push(format!("{}: {}", hypothesis.name(), warning));
    }
    warnings.extend(warn_if_not_exchangeable(design, hypothesis, config.method));

    let engine = ResamplingEngine::new(&table, &estimate, config)?;
    let mut run = engine.run(&[hypothesis], &[observed])?;
    let mut outcome = run
        .outcomes
        .pop()
        .ok_or_else(|| Error::data("resampling produced no outcome"))?;
    warnings.append(&mut outcome.warnings);
    outcome.warnings = warnings;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Factor;
    use crate::hypothesis::{build_hypothesis_matrices, EffectSpec, HypothesisSet};
    use rand::Rng;
    use rand_distr::StandardNormal;

    fn design() -> Design {
        Design::new(vec![Factor::between("group", 2), Factor::within("time", 3)]).unwrap()
    }

    /// Two groups of normal profiles; `shift` is added to every cell of group 1.
    fn table(shift: f64, seed: u64) -> SubjectTable {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let groups = [8, 10]
            .iter()
            .enumerate()
            .map(|(g, &n)| {
                Matrix::from_fn(n, 3, |_, _| {
                    rng.sample::<f64, _>(StandardNormal) + if g == 1 { shift } else { 0.0 }
                })
            })
            .collect();
        SubjectTable::from_groups(groups).unwrap()
    }

    fn config(method: ResamplingMethod, iterations: usize) -> ResamplingConfig {
        ResamplingConfig {
            method,
            iterations,
            seed: Some(7),
            ..ResamplingConfig::default()
        }
    }

    fn run(table: &SubjectTable, config: &ResamplingConfig) -> Result<ResamplingRun> {
        let set: HypothesisSet = build_hypothesis_matrices(&design(), &EffectSpec::Full).unwrap();
        let hypotheses: Vec<&Hypothesis> = set.tested().collect();
        let estimate = MomentEstimate::from_table(table);
        let observed: Vec<StatisticResult> = hypotheses
            .iter()
            .map(|h| evaluate_hypothesis(h, &estimate))
            .collect();
        ResamplingEngine::new(table, &estimate, config)?.run(&hypotheses, &observed)
    }

    #[test]
    fn test_p_values_are_bounded() {
        let data = table(0.0, 1);
        let iterations = 99;
        for method in [
            ResamplingMethod::Permutation,
            ResamplingMethod::ParametricBootstrap,
            ResamplingMethod::WildBootstrap,
        ] {
            let result = run(&data, &config(method, iterations)).unwrap();
            assert_eq!(result.outcomes.len(), 3);
            assert_eq!(result.iterations, iterations);
            for outcome in &result.outcomes {
                assert!(outcome.p_wts >= 1.0 / (iterations as f64 + 1.0));
                assert!(outcome.p_wts <= 1.0);
                assert_eq!(
                    outcome.distribution.wts.len() + outcome.distribution.degenerate,
                    iterations
                );
            }
        }
    }

    #[test]
    fn test_ats_resampled_only_by_wild_bootstrap() {
        let data = table(0.0, 2);
        let wild = run(&data, &config(ResamplingMethod::WildBootstrap, 50)).unwrap();
        assert!(wild.outcomes.iter().all(|o| o.p_ats.is_some()));

        let perm = run(&data, &config(ResamplingMethod::Permutation, 50)).unwrap();
        assert!(perm.outcomes.iter().all(|o| o.p_ats.is_none() && o.distribution.ats.is_none()));
    }

    #[test]
    fn test_strong_group_effect_is_detected() {
        let data = table(4.0, 3);
        for method in [ResamplingMethod::Permutation, ResamplingMethod::WildBootstrap] {
            let result = run(&data, &config(method, 199)).unwrap();
            let group = result.outcomes.iter().find(|o| o.effect == "group").unwrap();
            assert!(group.p_wts < 0.02, "{}: p = {}", method, group.p_wts);
        }
    }

    #[test]
    fn test_same_seed_same_result_for_any_worker_count() {
        let data = table(0.5, 4);
        let mut single = config(ResamplingMethod::WildBootstrap, 64);
        single.parallelism = Some(1);
        single.confidence_quantile = true;
        let mut many = single.clone();
        many.parallelism = Some(4);

        let a = run(&data, &single).unwrap();
        let b = run(&data, &many).unwrap();
        assert_eq!(a, b);

        let mut other_seed = single.clone();
        other_seed.seed = Some(8);
        assert_ne!(a, run(&data, &other_seed).unwrap());
    }

    #[test]
    fn test_confidence_quantile() {
        let data = table(0.0, 5);
        for method in [
            ResamplingMethod::Permutation,
            ResamplingMethod::ParametricBootstrap,
            ResamplingMethod::WildBootstrap,
        ] {
            let mut cfg = config(method, 100);
            assert!(run(&data, &cfg).unwrap().confidence_quantile.is_none());

            cfg.confidence_quantile = true;
            let q = run(&data, &cfg).unwrap().confidence_quantile.unwrap();
            assert!(q.is_finite() && q > 0.0, "{}: q = {}", method, q);
        }
    }

    #[test]
    fn test_cancelled_run_returns_error() {
        let data = table(0.0, 6);
        let mut cfg = config(ResamplingMethod::WildBootstrap, 20);
        cfg.cancel = Some(Arc::new(AtomicBool::new(true)));

        let err = run(&data, &cfg).unwrap_err();
        assert_eq!(
            err,
            Error::Cancelled {
                completed: 0,
                requested: 20
            }
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let data = table(0.0, 7);
        let err = run(&data, &config(ResamplingMethod::WildBootstrap, 0)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_single_hypothesis_convenience() {
        let design = Design::new(vec![Factor::within("time", 2)]).unwrap();
        let sample = Sample::new(
            vec![1.0, 2.5, 2.0, 2.9, 3.0, 4.4, 0.5, 1.0],
            vec![1, 1, 2, 2, 3, 3, 4, 4],
            vec![0, 1, 0, 1, 0, 1, 0, 1],
        )
        .unwrap();
        let set = build_hypothesis_matrices(&design, &EffectSpec::Full).unwrap();
        let time = set.get("time").unwrap();

        let outcome = resample(&sample, &design, time, &config(ResamplingMethod::WildBootstrap, 40)).unwrap();
        assert_eq!(outcome.effect, "time");
        assert!(outcome.p_wts > 0.0 && outcome.p_wts <= 1.0);
    }

    /// One group of 4 subjects with 6 repeated measurements: every
    /// covariance estimate has rank at most 3.
    fn rank_deficient_sample() -> (Design, Sample) {
        let design = Design::new(vec![Factor::within("time", 6)]).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(12);
        let mut response = Vec::new();
        let mut subjects = Vec::new();
        let mut cells = Vec::new();
        for id in 0..4u64 {
            for slot in 0..6 {
                response.push(rng.sample::<f64, _>(StandardNormal) + slot as f64);
                subjects.push(id);
                cells.push(slot);
            }
        }
        (design, Sample::new(response, subjects, cells).unwrap())
    }

    #[test]
    fn test_rank_deficient_draws_are_flagged() {
        let (design, sample) = rank_deficient_sample();
        let set = build_hypothesis_matrices(&design, &EffectSpec::Full).unwrap();
        let time = set.get("time").unwrap();
        let table = sample.arrange(&design).unwrap();
        let estimate = MomentEstimate::from_table(&table);
        let observed = evaluate_hypothesis(time, &estimate);

        for method in [ResamplingMethod::ParametricBootstrap, ResamplingMethod::WildBootstrap] {
            let cfg = config(method, 200);
            let run = ResamplingEngine::new(&table, &estimate, &cfg)
                .unwrap()
                .run(&[time], &[observed])
                .unwrap();

            let outcome = &run.outcomes[0];
            assert!(
                outcome.distribution.flagged as f64 > DEGENERATE_WARNING_FRACTION * 200.0,
                "{}: only {} flagged",
                method,
                outcome.distribution.flagged
            );
            assert!(run.degenerate_fraction > DEGENERATE_WARNING_FRACTION);
            assert!(run.warnings.iter().any(|w| w.contains("degenerate covariance")));
            assert_eq!(outcome.warnings.len(), 1);
            // Near-singular statistics are finite and stay in the distribution
            assert_eq!(outcome.distribution.wts.len() + outcome.distribution.degenerate, 200);
        }
    }

    #[test]
    fn test_well_conditioned_draws_are_not_flagged() {
        let data = table(0.0, 13);
        let result = run(&data, &config(ResamplingMethod::WildBootstrap, 100)).unwrap();
        assert!(result.degenerate_fraction <= DEGENERATE_WARNING_FRACTION);
        assert!(result.warnings.is_empty());
        assert!(result.outcomes.iter().all(|o| o.warnings.is_empty()));
    }

    #[test]
    fn test_single_hypothesis_returns_warnings() {
        let (design, sample) = rank_deficient_sample();
        let set = build_hypothesis_matrices(&design, &EffectSpec::Full).unwrap();
        let time = set.get("time").unwrap();

        let outcome = resample(&sample, &design, time, &config(ResamplingMethod::Permutation, 50)).unwrap();
        assert!(outcome.warnings.iter().any(|w| w.contains("near-singular")));
        assert!(outcome.warnings.iter().any(|w| w.contains("permutation p-value is unreliable")));
        assert!(outcome.warnings.iter().all(|w| w.starts_with("time: ")));
    }
}
