//! Long-slit spectroscopic reduction.
//!
//! Takes detector frames through the classical reduction chain:
//!
//! - `frame` wraps 2-D images with the CCD noise model, a bad-pixel mask,
//!   and observing metadata
//! - `trace` finds spectra on the detector and fits their drift along the
//!   dispersion axis
//! - `rectify` straightens a curved trace by Fourier-shifting each column
//! - `extract` collapses the aperture to 1-D counts by plain summation or
//!   by Horne or Marsh optimal weighting, with sky subtraction
//! - `fluxcal` converts counts to physical flux using a standard-star
//!   sensitivity function and per-site atmospheric extinction
//!
//! Wavelength calibration against an arc lamp lives in the companion
//! `arcfit` crate; [`SpectralExtractor::extract_arc`] produces the 1-D arc
//! spectrum it consumes.
//!
//! ```text
//! frame -> trace -> rectify -> extract -> calibrate -> flux
//! ```

pub mod extract;
pub mod fluxcal;
pub mod frame;
pub mod rectify;
pub mod trace;

pub use extract::{
    ApertureProfile, ExtractError, ExtractedSpectrum, ExtractionAlgorithm, QuadratureMode,
    ResidualImage, SpectralExtractor,
};
pub use fluxcal::{
    standard_star, ExtinctionCurve, FluxCalibrator, FluxConfig, FluxError, SensitivityFunction,
    Site, StandardStar,
};
pub use frame::{Frame, FrameMeta};
pub use rectify::{Rectifier, RectifyConfig};
pub use trace::{ApertureTracer, Trace, TraceConfig, TraceError};
