//! Wavelength calibration state machine.
//!
//! Drives an arc spectrum through the three calibration stages in order:
//!
//! - `detect_lines` finds emission-line peaks
//! - `match_candidates` screens (peak, catalog line) pairs with a Hough vote
//! - `fit` runs seeded RANSAC and refits on the inliers
//!
//! Each stage is only legal from the state the previous stage left behind;
//! out-of-order calls return [`CalibrationError::InvalidTransition`] without
//! touching the machine. A failed fit parks the machine in `Failed` with the
//! reason preserved, and `reset` returns it to `Uncalibrated` for another
//! attempt.

use crate::atlas::ArcLineCatalog;
use crate::error::CalibrationError;
use crate::hough::{self, Candidate, HoughConfig, HoughEstimate};
use crate::peaks::{find_peaks, DetectedPeak, PeakConfig};
use crate::ransac::{ransac_fit, RansacConfig};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settings for all three calibration stages.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibratorConfig {
    /// Peak detection stage
    pub peaks: PeakConfig,
    /// Hough candidate matching stage
    pub hough: HoughConfig,
    /// RANSAC fitting stage
    pub ransac: RansacConfig,
}

/// Where the machine is in the calibration sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalibratorState {
    /// No arc spectrum has been processed yet
    Uncalibrated,
    /// Peaks detected, awaiting candidate matching
    LinesDetected {
        /// Peaks surviving detection
        n_peaks: usize,
    },
    /// Candidates matched, awaiting the fit
    CandidatesMatched {
        /// Correspondences produced by the Hough stage
        n_candidates: usize,
    },
    /// A solution is available
    Fitted,
    /// The fit stage gave up; see the reason
    Failed {
        /// Rendering of the error that stopped the fit
        reason: String,
    },
}

impl fmt::Display for CalibratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncalibrated => write!(f, "uncalibrated"),
            Self::LinesDetected { n_peaks } => write!(f, "lines-detected ({n_peaks} peaks)"),
            Self::CandidatesMatched { n_candidates } => {
                write!(f, "candidates-matched ({n_candidates} candidates)")
            }
            Self::Fitted => write!(f, "fitted"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A fitted pixel-to-wavelength map with its fit diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavelengthSolution {
    /// Polynomial coefficients in ascending powers of pixel position
    pub coefficients: Vec<f64>,
    /// RMS residual of the inliers, Angstrom
    pub rms: f64,
    /// Peaks matched to catalog lines by the accepted model
    pub inlier_count: usize,
    /// Inliers over detected peaks
    pub inlier_fraction: f64,
    /// Candidate correspondences the fit drew from
    pub n_candidates: usize,
}

impl WavelengthSolution {
    /// Wavelength at a (fractional) pixel position.
    pub fn wavelength_at(&self, pixel: f64) -> f64 {
        let mut acc = 0.0;
        for &c in self.coefficients.iter().rev() {
            acc = acc * pixel + c;
        }
        acc
    }

    /// Wavelength of every integer pixel on an `n_pixels` axis.
    pub fn wavelengths(&self, n_pixels: usize) -> Vec<f64> {
        (0..n_pixels).map(|p| self.wavelength_at(p as f64)).collect()
    }
}

/// Calibrates the dispersion axis of a spectrograph against a line catalog.
#[derive(Debug, Clone)]
pub struct ArcLineCalibrator {
    config: CalibratorConfig,
    catalog: ArcLineCatalog,
    state: CalibratorState,
    n_pixels: usize,
    peaks: Vec<DetectedPeak>,
    estimates: Vec<HoughEstimate>,
    candidates: Vec<Candidate>,
    solution: Option<WavelengthSolution>,
}

impl ArcLineCalibrator {
    /// Create a calibrator for the given catalog.
    pub fn new(catalog: ArcLineCatalog, config: CalibratorConfig) -> Self {
        Self {
            config,
            catalog,
            state: CalibratorState::Uncalibrated,
            n_pixels: 0,
            peaks: Vec::new(),
            estimates: Vec::new(),
            candidates: Vec::new(),
            solution: None,
        }
    }

    /// Current position in the calibration sequence.
    pub fn state(&self) -> &CalibratorState {
        &self.state
    }

    /// Peaks found by the detection stage.
    pub fn peaks(&self) -> &[DetectedPeak] {
        &self.peaks
    }

    /// Top-voted linear estimates from the Hough stage.
    pub fn estimates(&self) -> &[HoughEstimate] {
        &self.estimates
    }

    /// Candidate correspondences handed to the fit.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// The fitted solution, if the machine has reached `Fitted`.
    pub fn solution(&self) -> Option<&WavelengthSolution> {
        self.solution.as_ref()
    }

    /// Discard all stage products and return to `Uncalibrated`.
    pub fn reset(&mut self) {
        self.state = CalibratorState::Uncalibrated;
        self.n_pixels = 0;
        self.peaks.clear();
        self.estimates.clear();
        self.candidates.clear();
        self.solution = None;
    }

    /// Detect arc-line peaks in `spectrum`.
    ///
    /// Non-finite samples are treated as zero. Legal only from
    /// `Uncalibrated`; call [`reset`](Self::reset) to process a new arc.
    ///
    /// # Returns
    /// * `Ok(n)` - Number of peaks detected
    pub fn detect_lines(&mut self, spectrum: &[f64]) -> Result<usize, CalibrationError> {
        if self.state != CalibratorState::Uncalibrated {
            return Err(CalibrationError::InvalidTransition {
                operation: "detect lines",
                state: self.state.to_string(),
            });
        }
        if spectrum.is_empty() || spectrum.iter().all(|v| !v.is_finite()) {
            return Err(CalibrationError::EmptySpectrum);
        }
        let clean: Vec<f64> = spectrum
            .iter()
            .map(|&v| if v.is_finite() { v } else { 0.0 })
            .collect();

        let peaks = find_peaks(&clean, &self.config.peaks);
        let needed = self.config.ransac.degree + 1;
        if peaks.len() < needed {
            return Err(CalibrationError::TooFewPeaks {
                found: peaks.len(),
                needed,
            });
        }

        info!("detected {} arc-line peaks", peaks.len());
        self.n_pixels = clean.len();
        self.peaks = peaks;
        self.state = CalibratorState::LinesDetected {
            n_peaks: self.peaks.len(),
        };
        Ok(self.peaks.len())
    }

    /// Match detected peaks against the catalog.
    ///
    /// Legal only from `LinesDetected`.
    ///
    /// # Returns
    /// * `Ok(n)` - Number of candidate correspondences
    pub fn match_candidates(&mut self) -> Result<usize, CalibrationError> {
        if !matches!(self.state, CalibratorState::LinesDetected { .. }) {
            return Err(CalibrationError::InvalidTransition {
                operation: "match candidates",
                state: self.state.to_string(),
            });
        }

        let wavelengths = self.catalog.wavelengths();
        let (estimates, candidates) =
            hough::match_candidates(&self.peaks, &wavelengths, &self.config.hough);
        if candidates.is_empty() {
            return Err(CalibrationError::NoCandidates {
                range_tolerance: self.config.hough.range_tolerance,
            });
        }

        info!(
            "matched {} candidates from {} hough estimates",
            candidates.len(),
            estimates.len()
        );
        self.estimates = estimates;
        self.candidates = candidates;
        self.state = CalibratorState::CandidatesMatched {
            n_candidates: self.candidates.len(),
        };
        Ok(self.candidates.len())
    }

    /// Fit the pixel-to-wavelength polynomial.
    ///
    /// Legal only from `CandidatesMatched`. Pass a seed for a reproducible
    /// fit; `None` draws entropy. On success the machine moves to `Fitted`;
    /// on failure it moves to `Failed` and the error is returned.
    pub fn fit(&mut self, rng_seed: Option<u64>) -> Result<&WavelengthSolution, CalibrationError> {
        if !matches!(self.state, CalibratorState::CandidatesMatched { .. }) {
            return Err(CalibrationError::InvalidTransition {
                operation: "fit",
                state: self.state.to_string(),
            });
        }

        match ransac_fit(
            &self.candidates,
            self.peaks.len(),
            self.n_pixels,
            &self.config.ransac,
            rng_seed,
        ) {
            Ok(result) => {
                let solution = WavelengthSolution {
                    coefficients: result.polynomial.coeffs().to_vec(),
                    rms: result.rms,
                    inlier_count: result.inliers.len(),
                    inlier_fraction: result.inlier_fraction,
                    n_candidates: self.candidates.len(),
                };
                self.state = CalibratorState::Fitted;
                Ok(self.solution.insert(solution))
            }
            Err(err) => {
                self.state = CalibratorState::Failed {
                    reason: err.to_string(),
                };
                Err(err)
            }
        }
    }

    /// Run all three stages on `spectrum`, resetting first.
    pub fn calibrate(
        &mut self,
        spectrum: &[f64],
        rng_seed: Option<u64>,
    ) -> Result<&WavelengthSolution, CalibrationError> {
        self.reset();
        self.detect_lines(spectrum)?;
        self.match_candidates()?;
        self.fit(rng_seed)
    }
}
