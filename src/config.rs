//! Configuration for repeated-measures analyses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration options for [`RmAnova`](crate::RmAnova).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Resampling repetitions (default: 10,000).
    pub iterations: usize,

    /// Significance level for confidence intervals (default: 0.05).
    pub alpha: f64,

    /// Resampling scheme (default: wild bootstrap).
    pub resampling: ResamplingMethod,

    /// How descriptive confidence intervals are built (default: t-quantile).
    pub ci_method: CiMethod,

    /// Worker threads for resampling; `None` uses every available core.
    pub parallelism: Option<usize>,

    /// Base seed for resampling; `None` uses a fixed default so runs are
    /// reproducible unless a seed is chosen explicitly.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            alpha: 0.05,
            resampling: ResamplingMethod::WildBootstrap,
            ci_method: CiMethod::TQuantile,
            parallelism: None,
            seed: None,
        }
    }
}

impl Config {
    /// Seed used when none is configured.
    pub const DEFAULT_SEED: u64 = 42;

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for zero iterations, `alpha` outside (0, 1),
    /// or zero worker threads.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::config("iterations must be a positive integer"));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::config(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if self.parallelism == Some(0) {
            return Err(Error::config("parallelism must be at least 1 worker"));
        }
        Ok(())
    }

    /// Seed actually used for resampling.
    pub fn effective_seed(&self) -> u64 {
        self.seed.unwrap_or(Self::DEFAULT_SEED)
    }
}

/// Resampling scheme for the empirical null distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResamplingMethod {
    /// Shuffle whole subject profiles across between-subject groups.
    /// Resamples the WTS only.
    Permutation,
    /// Draw subject profiles from `N(0, V̂ᵢ)` per group. Resamples the WTS only.
    ParametricBootstrap,
    /// Flip the sign of each subject's residual profile with a Rademacher
    /// weight. Resamples both WTS and ATS.
    WildBootstrap,
}

impl ResamplingMethod {
    /// Whether the method yields a valid resampling distribution for the ATS.
    pub fn resamples_ats(&self) -> bool {
        matches!(self, ResamplingMethod::WildBootstrap)
    }
}

impl FromStr for ResamplingMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "perm" | "permutation" => Ok(ResamplingMethod::Permutation),
            "parambs" | "parametricbootstrap" => Ok(ResamplingMethod::ParametricBootstrap),
            "wildbs" | "wildbootstrap" => Ok(ResamplingMethod::WildBootstrap),
            _ => Err(Error::config(format!(
                "unknown resampling method '{}' (expected Perm, paramBS or WildBS)",
                s
            ))),
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResamplingMethod::Permutation => "Perm",
            ResamplingMethod::ParametricBootstrap => "paramBS",
            ResamplingMethod::WildBootstrap => "WildBS",
        };
        f.write_str(name)
    }
}

/// Construction of descriptive confidence intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CiMethod {
    /// Student-t quantiles per cell.
    TQuantile,
    /// Quantile of the resampled Wald-type statistic.
    Resampling,
}

impl FromStr for CiMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "t-quantile" | "t_quantile" | "t" => Ok(CiMethod::TQuantile),
            "resampling" => Ok(CiMethod::Resampling),
            _ => Err(Error::config(format!(
                "unknown CI method '{}' (expected t-quantile or resampling)",
                s
            ))),
        }
    }
}

impl fmt::Display for CiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CiMethod::TQuantile => f.write_str("t-quantile"),
            CiMethod::Resampling => f.write_str("resampling"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.iterations, 10_000);
        assert_eq!(config.alpha, 0.05);
        assert_eq!(config.effective_seed(), Config::DEFAULT_SEED);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_resampling_methods() {
        assert_eq!("Perm".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::Permutation);
        assert_eq!(
            "paramBS".parse::<ResamplingMethod>().unwrap(),
            ResamplingMethod::ParametricBootstrap
        );
        assert_eq!(
            "wild_bootstrap".parse::<ResamplingMethod>().unwrap(),
            ResamplingMethod::WildBootstrap
        );
        let err = "jackknife".parse::<ResamplingMethod>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in [
            ResamplingMethod::Permutation,
            ResamplingMethod::ParametricBootstrap,
            ResamplingMethod::WildBootstrap,
        ] {
            assert_eq!(method.to_string().parse::<ResamplingMethod>().unwrap(), method);
        }
        assert_eq!("t-quantile".parse::<CiMethod>().unwrap(), CiMethod::TQuantile);
        assert!("bonferroni".parse::<CiMethod>().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_alpha = Config {
            alpha: 1.5,
            ..Config::default()
        };
        assert!(bad_alpha.validate().is_err());

        let no_iterations = Config {
            iterations: 0,
            ..Config::default()
        };
        assert!(no_iterations.validate().is_err());

        let no_workers = Config {
            parallelism: Some(0),
            ..Config::default()
        };
        assert!(no_workers.validate().is_err());
    }

    #[test]
    fn test_only_wild_bootstrap_resamples_ats() {
        assert!(ResamplingMethod::WildBootstrap.resamples_ats());
        assert!(!ResamplingMethod::Permutation.resamples_ats());
        assert!(!ResamplingMethod::ParametricBootstrap.resamples_ats());
    }
}
