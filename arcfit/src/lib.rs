//! Wavelength calibration for long-slit spectrographs.
//!
//! Turns a 1-D arc-lamp spectrum into a polynomial pixel-to-wavelength
//! solution without an initial guess:
//!
//! - `peaks` detects emission lines by prominence and refines them to
//!   sub-pixel centroids
//! - `hough` votes (peak, catalog line) pairs into a linear-map accumulator
//!   and keeps the pairs consistent with the top-voted maps
//! - `ransac` robustly fits the dispersion polynomial over the surviving
//!   candidates, in parallel and reproducibly for a fixed seed
//! - `calibrator` sequences the stages behind an explicit state machine
//! - `atlas` ships a xenon line list and the catalog type
//! - `refraction` converts vacuum wavelengths to air at the observing
//!   conditions
//!
//! ```text
//! arc spectrum -> detect_lines -> match_candidates -> fit -> solution
//! ```

pub mod atlas;
pub mod calibrator;
pub mod error;
pub mod hough;
pub mod peaks;
pub mod ransac;
pub mod refraction;

pub use atlas::{ArcLine, ArcLineCatalog};
pub use calibrator::{ArcLineCalibrator, CalibratorConfig, CalibratorState, WavelengthSolution};
pub use error::CalibrationError;
pub use hough::{Candidate, HoughConfig, HoughEstimate};
pub use peaks::{find_peaks, DetectedPeak, PeakConfig};
pub use ransac::{ransac_fit, RansacConfig, RansacResult};
pub use refraction::{refractive_index, vacuum_to_air, ObservingConditions};
