//! Robust statistics for detector data.
//!
//! Detector columns routinely contain NaN (masked) pixels and cosmic-ray
//! spikes, so the selectors here filter NaN and the spread estimators lean
//! on rank statistics rather than moments.

/// Median of a slice, ignoring NaN values.
///
/// For even counts the two middle values are averaged.
///
/// # Returns
/// * `Ok(median)` - The median value
/// * `Err(message)` - If no valid values remain after filtering NaN
pub fn median(values: &[f64]) -> Result<f64, String> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    if valid.is_empty() {
        return Err(format!(
            "cannot compute median: {} values, none valid",
            values.len()
        ));
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = valid.len() / 2;
    if valid.len() % 2 == 0 {
        Ok((valid[mid - 1] + valid[mid]) / 2.0)
    } else {
        Ok(valid[mid])
    }
}

/// Median absolute deviation from the median, ignoring NaN values.
///
/// Multiply by 1.4826 for a normal-consistent sigma estimate.
pub fn median_abs_deviation(values: &[f64]) -> Result<f64, String> {
    let center = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - center).abs())
        .collect();
    median(&deviations)
}

/// Percentile with linear interpolation between order statistics,
/// ignoring NaN values. `pct` is in [0, 100].
pub fn percentile(values: &[f64], pct: f64) -> Result<f64, String> {
    if !(0.0..=100.0).contains(&pct) {
        return Err(format!("percentile {pct} outside [0, 100]"));
    }
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    if valid.is_empty() {
        return Err(format!(
            "cannot compute percentile: {} values, none valid",
            values.len()
        ));
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = pct / 100.0 * (valid.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Ok(valid[lo]);
    }
    let t = rank - lo as f64;
    Ok(valid[lo] + t * (valid[hi] - valid[lo]))
}

/// Unbiased sample standard deviation, ignoring NaN values.
///
/// Returns 0.0 when fewer than two valid values remain.
pub fn sample_std(values: &[f64]) -> f64 {
    let valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    if valid.len() < 2 {
        return 0.0;
    }
    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let var = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Weighted arithmetic mean. Returns None when the total weight is zero
/// or the inputs disagree in length.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.len() != weights.len() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let acc: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    Some(acc / total)
}
