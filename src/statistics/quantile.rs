//! Quantiles and p-values of resampling distributions.

/// `p`-quantile of a resampling distribution.
///
/// R-7 definition: with `h = (n − 1) p`, interpolate linearly between the
/// order statistics at `⌊h⌋` and `⌊h⌋ + 1`. The analysis driver uses it for
/// the `1 − α` quantile of the resampled identity-hypothesis WTS that scales
/// the simultaneous cell intervals. Runs in expected O(n) through
/// `select_nth_unstable_by`, so `data` is partially reordered; pass a scratch
/// copy of the finite statistics.
///
/// # Panics
///
/// Panics if `data` is empty or if `p` is outside [0, 1].
pub fn compute_quantile(data: &mut [f64], p: f64) -> f64 {
    assert!(!data.is_empty(), "quantile of an empty distribution");
    assert!((0.0..=1.0).contains(&p), "quantile level {} outside [0, 1]", p);

    let position = (data.len() - 1) as f64 * p;
    let below = position.floor() as usize;
    let weight = position - below as f64;

    let (_, &mut low, above) = data.select_nth_unstable_by(below, f64::total_cmp);
    if weight == 0.0 || above.is_empty() {
        return low;
    }

    // Next order statistic: minimum of the upper partition
    let high = above.iter().copied().fold(f64::INFINITY, f64::min);
    low + weight * (high - low)
}

/// Upper-tail resampling p-value with the add-one correction.
///
/// `(1 + #{t ≥ observed}) / (1 + len)`, which is never 0 and never exceeds 1.
/// Returns NaN for a NaN observed statistic.
pub fn upper_tail_p_value(distribution: &[f64], observed: f64) -> f64 {
    if observed.is_nan() {
        return f64::NAN;
    }
    let exceed = distribution.iter().filter(|&&t| t >= observed).count();
    (1 + exceed) as f64 / (1 + distribution.len()) as f64
}
