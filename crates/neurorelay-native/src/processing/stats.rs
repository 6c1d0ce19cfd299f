//! Score normalization helpers

/// Population standard deviation below which scores count as identical
pub const SCORE_STD_FLOOR: f64 = 1e-6;

/// Mean and population standard deviation
#[must_use]
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Softmax of the z-scored values.
///
/// Falls back to a uniform distribution when the standard deviation is at
/// or below [`SCORE_STD_FLOOR`].
#[must_use]
pub fn softmax_zscore(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let (mean, std) = mean_std(values);
    if !(std > SCORE_STD_FLOOR) {
        return vec![1.0 / values.len() as f64; values.len()];
    }

    let z: Vec<f64> = values.iter().map(|v| (v - mean) / std).collect();
    let max_z = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = z.iter().map(|v| (v - max_z).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the first one wins ties
#[must_use]
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let conf = softmax_zscore(&[0.1, 0.9, 0.2, 0.15]);
        assert!((conf.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(argmax(&conf), Some(1));
    }

    #[test]
    fn test_softmax_uniform_when_flat() {
        assert_eq!(softmax_zscore(&[0.3, 0.3, 0.3, 0.3]), vec![0.25; 4]);
        assert_eq!(softmax_zscore(&[0.5]), vec![1.0]);
        assert!(softmax_zscore(&[]).is_empty());
    }

    #[test]
    fn test_softmax_large_scores_stay_finite() {
        let conf = softmax_zscore(&[1e12, 3e12, 2e12]);
        assert!(conf.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_argmax_first_on_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
