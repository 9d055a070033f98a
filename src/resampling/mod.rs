//! Resampling approximations of the null distribution.
//!
//! - [`perturb`]: the three null models (permutation, parametric bootstrap,
//!   wild bootstrap) and per-repetition seeding
//! - [`engine`]: the parallel repetition loop, p-values and the confidence
//!   quantile

pub mod engine;
pub mod perturb;

pub use engine::{
    resample, ResamplingConfig, ResamplingDistribution, ResamplingEngine, ResamplingOutcome,
    ResamplingRun, DEGENERATE_WARNING_FRACTION,
};
pub use perturb::{counter_rng_seed, symmetric_sqrt, NullModel};
