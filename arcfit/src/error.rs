use spec_math::polynomial::FitError;
use thiserror::Error;

/// Errors produced by the wavelength calibration state machine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Too few arc-line peaks survived detection to attempt a fit.
    #[error("too few peaks detected: {found} found, {needed} needed")]
    TooFewPeaks {
        /// Peaks surviving prominence and distance filtering.
        found: usize,
        /// Minimum peaks required by the configured fit degree.
        needed: usize,
    },

    /// The Hough stage produced no candidate pixel/wavelength pairs.
    #[error("no candidate correspondences within {range_tolerance:.1} A of the hough estimates")]
    NoCandidates {
        /// Configured range tolerance in Angstrom.
        range_tolerance: f64,
    },

    /// RANSAC exhausted its trial budget below the minimum inlier fraction.
    #[error(
        "calibration did not converge after {tries} trials: \
         best model matched {best_inliers} peaks (fraction {best_fraction:.2}, rms {best_rms:.2} A)"
    )]
    NotConverged {
        /// Trials attempted.
        tries: usize,
        /// Inlier count of the best rejected model.
        best_inliers: usize,
        /// Inlier fraction of the best rejected model.
        best_fraction: f64,
        /// RMS residual of the best rejected model in Angstrom.
        best_rms: f64,
    },

    /// An operation was requested from the wrong state.
    #[error("cannot {operation} from state {state}")]
    InvalidTransition {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the machine was in.
        state: String,
    },

    /// The final refit on the inlier set failed.
    #[error("inlier refit failed: {0}")]
    RefitFailed(#[from] FitError),

    /// The arc spectrum was empty or entirely non-finite.
    #[error("arc spectrum has no usable samples")]
    EmptySpectrum,
}
