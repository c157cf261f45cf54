//! Module with the descriptive statistics used for scoring telemetry signals.

use statrs::statistics::{Data, Median, Statistics};

/// Arithmetic mean of the values, NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().mean()
}

/// Population standard deviation (ddof = 0) of the values, NaN for an empty slice.
pub fn population_std_dev(values: &[f64]) -> f64 {
    values.iter().population_std_dev()
}

/// Median of the values, NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    Data::new(values.to_vec()).median()
}

/// Standard score of every value w.r.t. the population mean and standard deviation.
///
/// Returns `None` if the standard deviation is zero (up to rounding) or not finite, in which case
/// no value deviates from the others and no score is defined.
pub fn zscores(values: &[f64]) -> Option<Vec<f64>> {
    let mu = mean(values);
    let sigma = population_std_dev(values);
    if !sigma.is_finite() || !mu.is_finite() || sigma <= 1e-12 * mu.abs().max(1.0) {
        return None;
    }
    Some(values.iter().map(|x| (x - mu) / sigma).collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn median_even_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn population_scores() {
        let z = zscores(&[1.0, 1.0, 1.0, 1.0, 100.0]).unwrap();
        // mean = 20.8, population std = 39.6
        assert!((z[4] - 2.0).abs() < 1e-12);
        assert!((z[0] + 0.5).abs() < 1e-12);
    }

    #[test]
    fn constant_signal_has_no_scores() {
        assert!(zscores(&[5.0, 5.0, 5.0]).is_none());
        assert!(zscores(&[0.1; 7]).is_none());
        assert!(zscores(&[]).is_none());
    }
}
