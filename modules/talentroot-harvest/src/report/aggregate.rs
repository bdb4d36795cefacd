//! The one shared aggregation utility. Every report-level average funnels
//! through `weighted_mean` so weighting choices live in configuration, not
//! scattered at call sites.

/// Weighted arithmetic mean of `value` over `items`, weighted by `weight`.
/// Returns 0.0 for empty input or all-zero weights.
pub fn weighted_mean<T>(
    items: &[T],
    value: impl Fn(&T) -> f64,
    weight: impl Fn(&T) -> f64,
) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for item in items {
        let w = weight(item);
        numerator += value(item) * w;
        denominator += w;
    }
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Plain mean: `weighted_mean` with unit weights.
pub fn mean<T>(items: &[T], value: impl Fn(&T) -> f64) -> f64 {
    weighted_mean(items, value, |_| 1.0)
}
