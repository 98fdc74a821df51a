//! Random-sample-consensus polynomial fitting.
//!
//! Trials are embarrassingly parallel: each one seeds its own generator
//! from the caller's seed plus the trial index, so a run is reproducible
//! for a fixed seed no matter how rayon schedules the work, and the
//! best-model reduction is a total order (inlier count, then RMS, then
//! trial index) that every reduction tree resolves identically.

use crate::error::CalibrationError;
use crate::hough::Candidate;
use log::{debug, info};
use rand::seq::index::sample;
use rand::{rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use spec_math::polynomial::{polyfit, Polynomial};

/// Sample count for the monotonicity screen of trial fits.
const MONOTONIC_SAMPLES: usize = 32;

/// RANSAC settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RansacConfig {
    /// Correspondences drawn per trial; must exceed the polynomial degree
    pub sample_size: usize,
    /// Trial budget
    pub max_tries: usize,
    /// Inlier acceptance tolerance, Angstrom
    pub tolerance: f64,
    /// Degree of the pixel-to-wavelength polynomial
    pub degree: usize,
    /// Fraction of detected peaks that must end up as inliers
    pub min_inlier_fraction: f64,
    /// Reject sample sets containing near-duplicate wavelengths
    pub filter_close: bool,
    /// Minimum wavelength separation within a sample set, Angstrom
    pub min_separation: f64,
    /// Reject trial fits that are not monotonic across the detector
    pub require_monotonic: bool,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            sample_size: 5,
            max_tries: 2000,
            tolerance: 10.0,
            degree: 4,
            min_inlier_fraction: 0.25,
            filter_close: true,
            min_separation: 10.0,
            require_monotonic: true,
        }
    }
}

/// Outcome of a converged RANSAC run.
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Polynomial refit on the full inlier set
    pub polynomial: Polynomial,
    /// RMS residual of the inliers against the refit model, Angstrom
    pub rms: f64,
    /// Accepted correspondences, at most one per peak
    pub inliers: Vec<Candidate>,
    /// Inliers over detected peaks
    pub inlier_fraction: f64,
}

/// One candidate peak with every wavelength proposed for it.
struct PeakGroup {
    peak_index: usize,
    pixel: f64,
    wavelengths: Vec<f64>,
}

fn group_by_peak(candidates: &[Candidate]) -> Vec<PeakGroup> {
    let mut groups: Vec<PeakGroup> = Vec::new();
    for cand in candidates {
        match groups.iter_mut().find(|g| g.peak_index == cand.peak_index) {
            Some(group) => group.wavelengths.push(cand.wavelength),
            None => groups.push(PeakGroup {
                peak_index: cand.peak_index,
                pixel: cand.pixel,
                wavelengths: vec![cand.wavelength],
            }),
        }
    }
    groups.sort_by_key(|g| g.peak_index);
    groups
}

/// Match every peak to its closest proposed wavelength under `poly`;
/// matches within `tolerance` are inliers.
fn collect_inliers(groups: &[PeakGroup], poly: &Polynomial, tolerance: f64) -> (Vec<Candidate>, f64) {
    let mut inliers = Vec::new();
    let mut sum_sq = 0.0;
    for group in groups {
        let predicted = poly.eval(group.pixel);
        let best = group
            .wavelengths
            .iter()
            .copied()
            .min_by(|a, b| {
                (a - predicted)
                    .abs()
                    .partial_cmp(&(b - predicted).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(wavelength) = best {
            let residual = wavelength - predicted;
            if residual.abs() <= tolerance {
                inliers.push(Candidate {
                    peak_index: group.peak_index,
                    pixel: group.pixel,
                    wavelength,
                });
                sum_sq += residual * residual;
            }
        }
    }
    let rms = if inliers.is_empty() {
        f64::INFINITY
    } else {
        (sum_sq / inliers.len() as f64).sqrt()
    };
    (inliers, rms)
}

struct Trial {
    index: usize,
    inlier_count: usize,
    rms: f64,
    poly: Polynomial,
}

/// Total order over trials: more inliers, then lower RMS, then lower index.
fn better(a: &Trial, b: &Trial) -> bool {
    if a.inlier_count != b.inlier_count {
        return a.inlier_count > b.inlier_count;
    }
    match a.rms.partial_cmp(&b.rms) {
        Some(std::cmp::Ordering::Less) => true,
        Some(std::cmp::Ordering::Greater) => false,
        _ => a.index < b.index,
    }
}

fn run_trial(
    trial: usize,
    seed: u64,
    candidates: &[Candidate],
    groups: &[PeakGroup],
    n_pixels: usize,
    config: &RansacConfig,
) -> Option<Trial> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(trial as u64));
    let picks = sample(&mut rng, candidates.len(), config.sample_size);

    let mut px = Vec::with_capacity(config.sample_size);
    let mut wl = Vec::with_capacity(config.sample_size);
    let mut peaks_seen = Vec::with_capacity(config.sample_size);
    for idx in picks.iter() {
        let cand = &candidates[idx];
        if peaks_seen.contains(&cand.peak_index) {
            return None;
        }
        peaks_seen.push(cand.peak_index);
        px.push(cand.pixel);
        wl.push(cand.wavelength);
    }

    if config.filter_close {
        for i in 0..wl.len() {
            for j in i + 1..wl.len() {
                if (wl[i] - wl[j]).abs() < config.min_separation {
                    return None;
                }
            }
        }
    }

    let poly = polyfit(&px, &wl, config.degree).ok()?;
    if config.require_monotonic
        && !poly.is_monotonic_over(0.0, (n_pixels - 1) as f64, MONOTONIC_SAMPLES)
    {
        return None;
    }

    let (inliers, rms) = collect_inliers(groups, &poly, config.tolerance);
    Some(Trial {
        index: trial,
        inlier_count: inliers.len(),
        rms,
        poly,
    })
}

/// Robustly fit the pixel-to-wavelength polynomial.
///
/// # Arguments
/// * `candidates` - Hough-screened (peak, wavelength) proposals
/// * `n_peaks` - Total detected peaks, the inlier-fraction denominator
/// * `n_pixels` - Dispersion length, bounds the monotonicity screen
/// * `config` - RANSAC settings
/// * `rng_seed` - Explicit seed for reproducible fits; None draws entropy
///
/// # Returns
/// * `Ok(RansacResult)` - The inlier-refit model with diagnostics
/// * `Err(CalibrationError)` - Not enough candidates, or no model reached
///   the minimum inlier fraction within the trial budget
pub fn ransac_fit(
    candidates: &[Candidate],
    n_peaks: usize,
    n_pixels: usize,
    config: &RansacConfig,
    rng_seed: Option<u64>,
) -> Result<RansacResult, CalibrationError> {
    assert!(
        config.sample_size > config.degree,
        "sample size {} cannot constrain a degree {} polynomial",
        config.sample_size,
        config.degree
    );
    assert!(n_pixels >= 2, "detector must span at least 2 pixels");

    let groups = group_by_peak(candidates);
    if candidates.len() < config.sample_size || groups.len() <= config.degree {
        return Err(CalibrationError::TooFewPeaks {
            found: groups.len(),
            needed: config.degree + 1,
        });
    }

    let seed = rng_seed.unwrap_or_else(|| rng().next_u64());
    debug!(
        "ransac: {} candidates over {} peaks, {} trials, seed {seed}",
        candidates.len(),
        groups.len(),
        config.max_tries
    );

    let best = (0..config.max_tries)
        .into_par_iter()
        .filter_map(|trial| run_trial(trial, seed, candidates, &groups, n_pixels, config))
        .reduce_with(|a, b| if better(&b, &a) { b } else { a });

    let best = match best {
        Some(trial) => trial,
        None => {
            return Err(CalibrationError::NotConverged {
                tries: config.max_tries,
                best_inliers: 0,
                best_fraction: 0.0,
                best_rms: f64::INFINITY,
            })
        }
    };

    // Refit on the best trial's inlier set, then re-evaluate the membership
    // once against the refit model for the reported diagnostics.
    let (inliers, _) = collect_inliers(&groups, &best.poly, config.tolerance);
    let px: Vec<f64> = inliers.iter().map(|c| c.pixel).collect();
    let wl: Vec<f64> = inliers.iter().map(|c| c.wavelength).collect();
    let refit = polyfit(&px, &wl, config.degree)?;
    let (final_inliers, final_rms) = collect_inliers(&groups, &refit, config.tolerance);

    let fraction = final_inliers.len() as f64 / n_peaks.max(1) as f64;
    if fraction < config.min_inlier_fraction {
        return Err(CalibrationError::NotConverged {
            tries: config.max_tries,
            best_inliers: final_inliers.len(),
            best_fraction: fraction,
            best_rms: final_rms,
        });
    }

    info!(
        "ransac converged: {}/{} peaks matched, rms {:.3} A (best trial {})",
        final_inliers.len(),
        n_peaks,
        final_rms,
        best.index
    );
    Ok(RansacResult {
        polynomial: refit,
        rms: final_rms,
        inliers: final_inliers,
        inlier_fraction: fraction,
    })
}
