//! Hough-transform candidate matching.
//!
//! Every (detected peak, catalog line) pair is consistent with a family of
//! linear pixel-to-wavelength maps; each pair votes for those maps in a
//! binned (slope, intercept) accumulator. Bins collecting many votes
//! correspond to linear maps many pairs agree on, and the pairs within a
//! wavelength corridor of the top bins become the candidate correspondences
//! handed to the RANSAC fit.

use crate::peaks::DetectedPeak;
use itertools::Itertools;
use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Bins with fewer votes than this are never reported.
const MIN_BIN_VOTES: u32 = 2;

/// Accumulator geometry and matching bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoughConfig {
    /// Shortest wavelength the detector is expected to reach, Angstrom
    pub min_wavelength: f64,
    /// Longest wavelength the detector is expected to reach, Angstrom
    pub max_wavelength: f64,
    /// Allowed play in the wavelength bounds, Angstrom
    pub range_tolerance: f64,
    /// Number of slope bins in the accumulator
    pub slope_bins: usize,
    /// Number of intercept bins in the accumulator
    pub intercept_bins: usize,
    /// How many top-voted bins seed the candidate search
    pub top_n_bins: usize,
    /// Half-width of the corridor around a top bin's line within which a
    /// (peak, line) pair becomes a candidate, Angstrom
    pub candidate_tolerance: f64,
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            min_wavelength: 3800.0,
            max_wavelength: 8200.0,
            range_tolerance: 500.0,
            slope_bins: 100,
            intercept_bins: 100,
            top_n_bins: 10,
            candidate_tolerance: 50.0,
        }
    }
}

/// A high-vote linear pixel-to-wavelength estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoughEstimate {
    /// Dispersion in Angstrom per pixel
    pub slope: f64,
    /// Wavelength at pixel zero, Angstrom
    pub intercept: f64,
    /// Votes collected by the accumulator bin
    pub votes: u32,
}

/// A candidate (peak, catalog line) correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Index of the detected peak this candidate belongs to
    pub peak_index: usize,
    /// Sub-pixel position of the peak
    pub pixel: f64,
    /// Catalog wavelength proposed for the peak, Angstrom
    pub wavelength: f64,
}

/// Vote over all (peak, line) pairs and harvest candidates near the
/// top-voted linear maps.
///
/// # Arguments
/// * `peaks` - Detected arc-line peaks
/// * `catalog` - Reference wavelengths, ascending, Angstrom
/// * `config` - Accumulator geometry and bounds
///
/// # Returns
/// Top linear estimates (highest votes first) and the deduplicated
/// candidate list, ordered by peak then wavelength.
pub fn match_candidates(
    peaks: &[DetectedPeak],
    catalog: &[f64],
    config: &HoughConfig,
) -> (Vec<HoughEstimate>, Vec<Candidate>) {
    assert!(
        config.slope_bins > 0 && config.intercept_bins > 0,
        "hough accumulator needs at least one bin per axis"
    );
    assert!(
        config.max_wavelength > config.min_wavelength,
        "wavelength bounds are inverted"
    );

    let span = config.max_wavelength - config.min_wavelength;
    // Slope bounds come from stretching the wavelength span across the pixel
    // range the peaks actually cover.
    let max_pixel = peaks
        .iter()
        .map(|p| p.subpixel)
        .fold(0.0, f64::max)
        .max(1.0);
    let slope_lo = ((span - 2.0 * config.range_tolerance) / max_pixel).max(0.0);
    let slope_hi = (span + 2.0 * config.range_tolerance) / max_pixel;
    let intercept_lo = config.min_wavelength - config.range_tolerance;
    let intercept_hi = config.min_wavelength + config.range_tolerance;

    let slope_step = (slope_hi - slope_lo) / config.slope_bins as f64;
    let intercept_step = (intercept_hi - intercept_lo) / config.intercept_bins as f64;

    let line_lo = config.min_wavelength - config.range_tolerance;
    let line_hi = config.max_wavelength + config.range_tolerance;
    let usable: Vec<f64> = catalog
        .iter()
        .copied()
        .filter(|&w| w >= line_lo && w <= line_hi)
        .collect();

    let mut accumulator: Array2<u32> = Array2::zeros((config.slope_bins, config.intercept_bins));
    for peak in peaks {
        for &wavelength in &usable {
            for k in 0..config.slope_bins {
                let slope = slope_lo + (k as f64 + 0.5) * slope_step;
                let intercept = wavelength - slope * peak.subpixel;
                if intercept < intercept_lo || intercept >= intercept_hi {
                    continue;
                }
                let j = ((intercept - intercept_lo) / intercept_step) as usize;
                accumulator[[k, j.min(config.intercept_bins - 1)]] += 1;
            }
        }
    }

    // Highest votes first; ties broken by bin index for determinism.
    let top: Vec<HoughEstimate> = accumulator
        .indexed_iter()
        .filter(|(_, &votes)| votes >= MIN_BIN_VOTES)
        .sorted_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(&b.0)))
        .take(config.top_n_bins)
        .map(|((k, j), &votes)| HoughEstimate {
            slope: slope_lo + (k as f64 + 0.5) * slope_step,
            intercept: intercept_lo + (j as f64 + 0.5) * intercept_step,
            votes,
        })
        .collect();

    let mut candidates: Vec<Candidate> = Vec::new();
    for (peak_index, peak) in peaks.iter().enumerate() {
        for &wavelength in &usable {
            let near_top_line = top.iter().any(|est| {
                let predicted = est.slope * peak.subpixel + est.intercept;
                (wavelength - predicted).abs() <= config.candidate_tolerance
            });
            if near_top_line {
                candidates.push(Candidate {
                    peak_index,
                    pixel: peak.subpixel,
                    wavelength,
                });
            }
        }
    }

    debug!(
        "hough: {} top bins (best {} votes), {} candidate pairs from {} peaks x {} lines",
        top.len(),
        top.first().map(|t| t.votes).unwrap_or(0),
        candidates.len(),
        peaks.len(),
        usable.len()
    );
    (top, candidates)
}
