//! Small statistics helpers shared by the analyzers.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation. Zero for fewer than two samples.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Standard deviation divided by the mean. Zero when the mean is zero.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    std_dev(values) / m.abs()
}

/// Shannon entropy (base 2) of a frequency distribution.
pub fn shannon_entropy(counts: &[u64]) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Differences between consecutive samples.
pub fn intervals(samples: &[f64]) -> Vec<f64> {
    samples.windows(2).map(|w| w[1] - w[0]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(std_dev(&[4.0]), 0.0);
        assert_eq!(std_dev(&[3.0, 3.0, 3.0]), 0.0);
        assert!(close(std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0));
    }

    #[test]
    fn test_coefficient_of_variation() {
        assert_eq!(coefficient_of_variation(&[0.0, 0.0]), 0.0);
        assert!(close(coefficient_of_variation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 0.4));
        assert_eq!(coefficient_of_variation(&[1.0, 1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_shannon_entropy() {
        assert_eq!(shannon_entropy(&[]), 0.0);
        assert_eq!(shannon_entropy(&[0, 0]), 0.0);
        assert_eq!(shannon_entropy(&[7]), 0.0);
        assert!(close(shannon_entropy(&[5, 5]), 1.0));
        assert!(close(shannon_entropy(&[1, 1, 1, 1]), 2.0));
    }

    #[test]
    fn test_intervals() {
        assert_eq!(intervals(&[1.0, 1.5, 3.0]), vec![0.5, 1.5]);
        assert!(intervals(&[1.0]).is_empty());
    }
}
