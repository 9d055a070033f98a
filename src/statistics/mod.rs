//! Statistical building blocks.
//!
//! - Streaming covariance accumulation
//! - Cell means and the block-diagonal covariance of the mean vector
//! - Quantiles and resampling p-values

mod covariance;
mod moments;
mod quantile;

pub use covariance::WelfordCovariance;
pub use moments::{estimate_moments, MomentEstimate};
pub use quantile::{compute_quantile, upper_tail_p_value};
