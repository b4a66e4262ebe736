//! Statistical utility functions shared across modules
//!
//! Pearson correlation with its two-sided t-test p-value, and the type-7
//! percentile used by the percentile filter.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Pearson correlation coefficient; `None` when undefined
/// (length mismatch, fewer than two points, non-finite input, zero variance)
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return None;
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    let r = sxy / (sxx.sqrt() * syy.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Two-sided p-value of a correlation `r` over `n` points (t-test, n-2 df)
pub fn correlation_pvalue(r: f64, n: usize) -> f64 {
    if n < 3 || !r.is_finite() {
        return 1.0;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let stat = r * (df / (1.0 - r * r)).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t_dist) => (2.0 * t_dist.cdf(-stat.abs())).min(1.0),
        Err(_) => 1.0,
    }
}

/// Pearson `(r, p)`; any degenerate input gives `(0, 1)`.
///
/// Two points are also degenerate here: their correlation is always
/// `±1`, carries no evidence, and is reported as `(0, 1)` rather than
/// `(±1, 1)`.
pub fn pearson_test(x: &[f64], y: &[f64]) -> (f64, f64) {
    if x.len() < 3 {
        return (0.0, 1.0);
    }
    match pearson(x, y) {
        Some(r) => (r, correlation_pvalue(r, x.len())),
        None => (0.0, 1.0),
    }
}

/// Percentile (0-100) with linear interpolation between order statistics
/// (Hyndman-Fan type 7). NaN values are ignored; all-NaN input gives NaN.
pub fn percentile_type7(values: &[f64], percent: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if n == 1 {
        return sorted[0];
    }

    let p = (percent / 100.0).clamp(0.0, 1.0);
    let h = (n as f64 - 1.0) * p;
    let lo = (h.floor() as usize).min(n - 1);
    let hi = (h.ceil() as usize).min(n - 1);
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_perfect_and_anti() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&x, &y).unwrap() - 1.0).abs() < 1e-12);
        let z = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&x, &z).unwrap() + 1.0).abs() < 1e-12);
        let (r, p) = pearson_test(&x, &y);
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(p, 0.0);
    }

    #[test]
    fn test_pearson_known_value() {
        // r = 0.8 for this pair; p from t = 0.8 * sqrt(3 / 0.36) = 2.3094, df = 3
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 1.0, 4.0, 3.0, 5.0];
        let (r, p) = pearson_test(&x, &y);
        assert!((r - 0.8).abs() < 1e-12);
        assert!((p - 0.104).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_inputs_give_sentinel() {
        assert_eq!(pearson_test(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), (0.0, 1.0));
        assert_eq!(pearson_test(&[1.0, f64::NAN, 3.0], &[1.0, 2.0, 3.0]), (0.0, 1.0));
        // two points: r would be -1, reported as the sentinel
        assert_eq!(pearson_test(&[1.0, 2.0], &[2.0, 1.0]), (0.0, 1.0));
        assert_eq!(pearson_test(&[1.0, 2.0], &[1.0, 3.0]), (0.0, 1.0));
        assert_eq!(pearson_test(&[1.0, 2.0, 3.0], &[1.0, 2.0]), (0.0, 1.0));
    }

    #[test]
    fn test_percentile_type7() {
        let v = [1.0, 2.0, 3.0, 4.0, f64::NAN];
        assert_eq!(percentile_type7(&v, 50.0), 2.5);
        assert_eq!(percentile_type7(&v, 0.0), 1.0);
        assert_eq!(percentile_type7(&v, 100.0), 4.0);
        assert!((percentile_type7(&v, 25.0) - 1.75).abs() < 1e-12);
        assert!(percentile_type7(&[f64::NAN], 50.0).is_nan());
    }
}
