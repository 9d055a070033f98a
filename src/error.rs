//! Error types shared by every stage of the analysis.
//!
//! Configuration and data problems are fatal and surface before any
//! resampling work starts. Numerical trouble (near-singular covariance
//! estimates) is not an error; see [`NumericWarning`](crate::NumericWarning).

use thiserror::Error;

/// Fatal failures of an analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Invalid configuration: unknown method names, malformed factorial
    /// structure, out-of-range tuning values.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The sample does not fit the design: missing values, unbalanced
    /// subjects, groups with fewer than two subjects.
    #[error("data error: {0}")]
    Data(String),

    /// The resampling loop was aborted through its cancel flag.
    #[error("resampling cancelled after {completed} of {requested} repetitions")]
    Cancelled {
        /// Repetitions that finished before the flag was observed.
        completed: usize,
        /// Repetitions requested by the configuration.
        requested: usize,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub(crate) fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }
}
