//! Descriptive statistics over plain value slices

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator), `None` below two values
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Percentile with linear interpolation between closest ranks.
///
/// `p` is in [0, 100]. `sorted` must be ascending.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
        }
    }
}

/// Copy and sort ascending, treating NaN as equal
pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), Some(5.0));
        // Sample variance = 32 / 7
        assert!((sample_std_dev(&values).unwrap() - (32.0_f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_small_inputs_are_absent() {
        assert_eq!(mean(&[]), None);
        assert_eq!(sample_std_dev(&[3.0]), None);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = sorted_copy(&[40.0, 10.0, 30.0, 20.0, 50.0]);
        assert_eq!(percentile(&sorted, 0.0), Some(10.0));
        assert_eq!(percentile(&sorted, 50.0), Some(30.0));
        assert_eq!(percentile(&sorted, 100.0), Some(50.0));
        // rank 0.25 * 4 = 1.0 => 20; rank 0.1 * 4 = 0.4 => 14
        assert_eq!(percentile(&sorted, 25.0), Some(20.0));
        assert!((percentile(&sorted, 10.0).unwrap() - 14.0).abs() < 1e-12);
    }
}
