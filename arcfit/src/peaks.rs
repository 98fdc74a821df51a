//! Arc-line peak detection.
//!
//! Finds emission-line candidates in a 1-D arc spectrum as local maxima
//! filtered by topographic prominence and a minimum mutual distance, then
//! refines each surviving peak to sub-pixel precision with a
//! baseline-subtracted centroid over a small window.

use log::debug;
use serde::{Deserialize, Serialize};

/// Peak detection settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakConfig {
    /// Minimum topographic prominence, in spectrum units
    pub prominence: f64,
    /// Minimum separation between accepted peaks, in pixels
    pub min_distance: usize,
    /// Half-width of the centroid refinement window, in pixels
    pub refine_window: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            prominence: 2.0,
            min_distance: 5,
            refine_window: 3,
        }
    }
}

/// A detected arc-line candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedPeak {
    /// Pixel index of the raw local maximum
    pub pixel: usize,
    /// Centroid-refined sub-pixel position
    pub subpixel: f64,
    /// Topographic prominence of the maximum
    pub prominence: f64,
}

/// Indices of local maxima; plateaus report their middle sample.
fn local_maxima(spectrum: &[f64]) -> Vec<usize> {
    let n = spectrum.len();
    let mut maxima = Vec::new();
    let mut i = 1;
    while n >= 3 && i < n - 1 {
        if spectrum[i] > spectrum[i - 1] {
            let mut j = i;
            while j + 1 < n && spectrum[j + 1] == spectrum[i] {
                j += 1;
            }
            if j + 1 < n && spectrum[j + 1] < spectrum[i] {
                maxima.push((i + j) / 2);
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    maxima
}

/// Topographic prominence: height above the higher of the two valley floors
/// separating the peak from taller terrain (or the spectrum edge).
fn prominence_of(spectrum: &[f64], peak: usize) -> f64 {
    let mut left_min = spectrum[peak];
    for j in (0..peak).rev() {
        if spectrum[j] > spectrum[peak] {
            break;
        }
        left_min = left_min.min(spectrum[j]);
    }
    let mut right_min = spectrum[peak];
    for value in &spectrum[peak + 1..] {
        if *value > spectrum[peak] {
            break;
        }
        right_min = right_min.min(*value);
    }
    spectrum[peak] - left_min.max(right_min)
}

/// Baseline-subtracted centroid within `half_width` pixels of `peak`.
fn refine_centroid(spectrum: &[f64], peak: usize, half_width: usize) -> f64 {
    let lo = peak.saturating_sub(half_width);
    let hi = (peak + half_width + 1).min(spectrum.len());
    let window = &spectrum[lo..hi];
    let baseline = window.iter().copied().fold(f64::INFINITY, f64::min);

    let mut weight = 0.0;
    let mut moment = 0.0;
    for (offset, &value) in window.iter().enumerate() {
        let v = value - baseline;
        weight += v;
        moment += v * (lo + offset) as f64;
    }
    if weight <= 0.0 {
        return peak as f64;
    }
    (moment / weight).clamp(lo as f64, (hi - 1) as f64)
}

/// Find arc-line peaks in a spectrum.
///
/// # Arguments
/// * `spectrum` - 1-D arc spectrum; values must be finite
/// * `config` - Prominence, distance and refinement settings
///
/// # Returns
/// Accepted peaks in ascending pixel order.
pub fn find_peaks(spectrum: &[f64], config: &PeakConfig) -> Vec<DetectedPeak> {
    debug_assert!(
        spectrum.iter().all(|v| v.is_finite()),
        "peak finder expects a finite spectrum"
    );

    let mut candidates: Vec<DetectedPeak> = local_maxima(spectrum)
        .into_iter()
        .map(|pixel| DetectedPeak {
            pixel,
            subpixel: pixel as f64,
            prominence: prominence_of(spectrum, pixel),
        })
        .filter(|p| p.prominence >= config.prominence)
        .collect();

    // Enforce the minimum distance, keeping taller peaks first.
    candidates.sort_by(|a, b| {
        spectrum[b.pixel]
            .partial_cmp(&spectrum[a.pixel])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut accepted: Vec<DetectedPeak> = Vec::with_capacity(candidates.len());
    for cand in candidates {
        let clear = accepted
            .iter()
            .all(|kept| kept.pixel.abs_diff(cand.pixel) >= config.min_distance);
        if clear {
            accepted.push(cand);
        }
    }
    accepted.sort_by_key(|p| p.pixel);

    for peak in accepted.iter_mut() {
        peak.subpixel = refine_centroid(spectrum, peak.pixel, config.refine_window);
    }
    debug!(
        "peak finder: {} candidates above prominence {}, spacing {} px",
        accepted.len(),
        config.prominence,
        config.min_distance
    );
    accepted
}
