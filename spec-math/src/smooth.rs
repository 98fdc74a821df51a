//! 1-D smoothing filters.
//!
//! `local_linear` is a LOWESS-style smoother: a tricube-weighted linear
//! regression over a sliding window, with optional bisquare robustness
//! passes that down-weight outliers such as cosmic-ray hits. The median and
//! boxcar filters are the blunter tools used for sensitivity curves.

use crate::stats::median;
use thiserror::Error;

/// Minimum number of samples for the local-regression smoother.
const MIN_SMOOTH_POINTS: usize = 4;

/// Errors that can occur when smoothing a sequence.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SmoothError {
    /// Span must be a fraction of the sequence in (0, 1].
    #[error("smoothing span {0} outside (0, 1]")]
    InvalidSpan(f64),
    /// Not enough samples to smooth.
    #[error("need at least {MIN_SMOOTH_POINTS} points to smooth, got {0}")]
    TooFewPoints(usize),
}

fn tricube(u: f64) -> f64 {
    if u >= 1.0 {
        return 0.0;
    }
    let t = 1.0 - u * u * u;
    t * t * t
}

fn bisquare(u: f64) -> f64 {
    if u.abs() >= 1.0 {
        return 0.0;
    }
    let t = 1.0 - u * u;
    t * t
}

/// Local linear regression smoothing over an index-spaced sequence.
///
/// # Arguments
/// * `y` - Samples at unit spacing
/// * `span` - Window size as a fraction of the sequence length, in (0, 1]
/// * `iterations` - Total passes; passes after the first reweight residuals
///   with a bisquare kernel (2 is a good default for spiky data)
///
/// # Returns
/// * `Ok(Vec<f64>)` - Smoothed sequence, same length as `y`
/// * `Err(SmoothError)` - Invalid span or too few points
pub fn local_linear(y: &[f64], span: f64, iterations: usize) -> Result<Vec<f64>, SmoothError> {
    if !(span > 0.0 && span <= 1.0) {
        return Err(SmoothError::InvalidSpan(span));
    }
    let n = y.len();
    if n < MIN_SMOOTH_POINTS {
        return Err(SmoothError::TooFewPoints(n));
    }

    let window = ((span * n as f64).ceil() as usize).clamp(3, n);
    let passes = iterations.max(1);

    let mut robustness = vec![1.0; n];
    let mut fitted = y.to_vec();

    for pass in 0..passes {
        for i in 0..n {
            let start = i.saturating_sub(window / 2).min(n - window);
            let end = start + window;

            // Tricube distance weights times the robustness weights.
            let dmax = (start..end)
                .map(|j| (j as f64 - i as f64).abs())
                .fold(0.0, f64::max)
                .max(1.0);
            let mut sw = 0.0;
            let mut sx = 0.0;
            let mut sy = 0.0;
            for j in start..end {
                let w = tricube((j as f64 - i as f64).abs() / dmax) * robustness[j];
                sw += w;
                sx += w * j as f64;
                sy += w * y[j];
            }
            if sw <= f64::EPSILON {
                fitted[i] = y[i];
                continue;
            }
            let mx = sx / sw;
            let my = sy / sw;
            let mut cov = 0.0;
            let mut var = 0.0;
            for j in start..end {
                let w = tricube((j as f64 - i as f64).abs() / dmax) * robustness[j];
                let dx = j as f64 - mx;
                cov += w * dx * (y[j] - my);
                var += w * dx * dx;
            }
            let slope = if var > f64::EPSILON { cov / var } else { 0.0 };
            fitted[i] = my + slope * (i as f64 - mx);
        }

        if pass + 1 == passes {
            break;
        }

        // Bisquare reweighting against six times the median absolute residual.
        let abs_resid: Vec<f64> = y.iter().zip(&fitted).map(|(a, b)| (a - b).abs()).collect();
        let scale = match median(&abs_resid) {
            Ok(m) => 6.0 * m,
            Err(_) => break,
        };
        if scale <= f64::EPSILON {
            break;
        }
        for (rw, (yi, fi)) in robustness.iter_mut().zip(y.iter().zip(&fitted)) {
            *rw = bisquare((yi - fi) / scale);
        }
    }

    Ok(fitted)
}

/// Sliding median filter with a centered window, clamped at the edges.
///
/// Panics if `window` is even or zero; a centered filter needs an odd width.
pub fn median_filter(y: &[f64], window: usize) -> Vec<f64> {
    assert!(
        window % 2 == 1 && window > 0,
        "median filter window must be odd and positive"
    );
    let n = y.len();
    if n == 0 {
        return Vec::new();
    }
    let w = window.min(n);
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(w / 2).min(n - w);
            median(&y[start..start + w]).unwrap_or(y[i])
        })
        .collect()
}

/// Sliding boxcar (mean) filter with a centered window, clamped at the edges.
///
/// Panics if `window` is even or zero.
pub fn boxcar(y: &[f64], window: usize) -> Vec<f64> {
    assert!(
        window % 2 == 1 && window > 0,
        "boxcar window must be odd and positive"
    );
    let n = y.len();
    if n == 0 {
        return Vec::new();
    }
    let w = window.min(n);
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(w / 2).min(n - w);
            y[start..start + w].iter().sum::<f64>() / w as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_local_linear_preserves_line() {
        let y: Vec<f64> = (0..32).map(|i| 2.0 * i as f64 + 5.0).collect();
        let smoothed = local_linear(&y, 0.3, 1).unwrap();
        for (a, b) in y.iter().zip(&smoothed) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_local_linear_suppresses_spike() {
        let mut y: Vec<f64> = (0..64).map(|i| (i as f64 * 0.2).sin()).collect();
        y[30] += 5.0;
        let smoothed = local_linear(&y, 0.25, 3).unwrap();
        let clean = (30.0_f64 * 0.2).sin();
        assert!(
            (smoothed[30] - clean).abs() < 1.0,
            "spike survived smoothing: {} vs clean {}",
            smoothed[30],
            clean
        );
    }

    #[test]
    fn test_local_linear_reduces_noise_variance() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let y: Vec<f64> = (0..128)
            .map(|i| (i as f64 * 0.05).cos() + rng.random_range(-0.2..0.2))
            .collect();
        let smoothed = local_linear(&y, 0.15, 2).unwrap();

        let resid_raw: f64 = y
            .iter()
            .enumerate()
            .map(|(i, v)| (v - (i as f64 * 0.05).cos()).powi(2))
            .sum();
        let resid_smooth: f64 = smoothed
            .iter()
            .enumerate()
            .map(|(i, v)| (v - (i as f64 * 0.05).cos()).powi(2))
            .sum();
        assert!(
            resid_smooth < resid_raw,
            "smoothing should reduce residual power: {resid_smooth} vs {resid_raw}"
        );
    }

    #[test]
    fn test_local_linear_rejects_bad_span() {
        let y = vec![0.0; 16];
        assert!(matches!(
            local_linear(&y, 0.0, 1),
            Err(SmoothError::InvalidSpan(_))
        ));
        assert!(matches!(
            local_linear(&y, 1.5, 1),
            Err(SmoothError::InvalidSpan(_))
        ));
    }

    #[test]
    fn test_local_linear_rejects_short_input() {
        let y = vec![1.0, 2.0, 3.0];
        assert!(matches!(
            local_linear(&y, 0.5, 1),
            Err(SmoothError::TooFewPoints(3))
        ));
    }

    #[test]
    fn test_median_filter_kills_single_outlier() {
        let mut y = vec![1.0; 11];
        y[5] = 100.0;
        let filtered = median_filter(&y, 3);
        assert_relative_eq!(filtered[5], 1.0);
    }

    #[test]
    fn test_boxcar_constant_unchanged() {
        let y = vec![4.2; 9];
        for v in boxcar(&y, 5) {
            assert_relative_eq!(v, 4.2);
        }
    }

    #[test]
    #[should_panic(expected = "must be odd")]
    fn test_even_window_panics() {
        median_filter(&[1.0, 2.0, 3.0], 2);
    }
}
