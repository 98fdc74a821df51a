//! spec-math - Core numerics for the long-slit reduction crates
//!
//! This crate provides the mathematical building blocks shared by the
//! wavelength-calibration and reduction pipelines:
//!
//! - **Polynomial** - least-squares polynomial fitting and Horner evaluation
//! - **Interpolation** - fast 1D linear interpolation over tabulated curves
//! - **Statistics** - robust statistics (median, MAD, percentiles)
//! - **Smoothing** - local-regression, median and boxcar filters
//! - **Gaussian** - 1D profile description, moment fits, pixel integrals
//!
//! # Example
//!
//! ```text
//! use spec_math::polynomial::polyfit;
//!
//! let x = vec![0.0, 1.0, 2.0, 3.0];
//! let y = vec![1.0, 3.0, 7.0, 13.0];
//! let poly = polyfit(&x, &y, 2).unwrap();
//! assert!((poly.eval(4.0) - 21.0).abs() < 1e-9);
//! ```

pub mod gaussian;
pub mod interp;
pub mod polynomial;
pub mod smooth;
pub mod stats;

// Re-export commonly used types
pub use gaussian::{GaussianProfile, FWHM_PER_SIGMA};
pub use interp::{interp, interp_clamped, resample, InterpError};
pub use polynomial::{polyfit, polyfit_weighted, FitError, Polynomial};
pub use smooth::{boxcar, local_linear, median_filter, SmoothError};
pub use stats::{median, median_abs_deviation, percentile, sample_std, weighted_mean};
