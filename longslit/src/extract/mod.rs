//! Spectral extraction.
//!
//! Three statistically distinct algorithms reduce a frame and a trace to a
//! 1-D count spectrum:
//!
//! - [`ExtractionAlgorithm::Tophat`] sums a fixed aperture after polynomial
//!   sky subtraction
//! - [`ExtractionAlgorithm::Horne86`] weights pixels by a per-column
//!   smoothed profile over their variance, clipping outliers
//! - [`ExtractionAlgorithm::Marsh89`] fits one polynomial surface to the
//!   normalized profile across all columns jointly, then applies the same
//!   optimal sum
//!
//! All three return the spectrum together with a full-frame
//! [`ResidualImage`] holding observed minus model inside the extraction
//! window.

mod background;
mod horne;
mod marsh;
mod tophat;

use crate::frame::Frame;
use crate::trace::Trace;
use log::debug;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) use background::fit_sky;

/// Errors from the extraction stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// The aperture or a sky strip leaves the frame's spatial extent.
    #[error(
        "aperture rows {lo}..={hi} fall outside the frame's {n_spatial} rows at column {column}"
    )]
    ApertureOutOfBounds {
        /// Dispersion column being extracted.
        column: usize,
        /// Lowest row the geometry requires.
        lo: isize,
        /// Highest row the geometry requires.
        hi: isize,
        /// Spatial extent of the frame.
        n_spatial: usize,
    },

    /// Too few unmasked pixels, or a degenerate profile, for a fit.
    #[error("degenerate fit at column {column}: {unmasked} usable pixels, {needed} needed")]
    DegenerateFit {
        /// Dispersion column being extracted.
        column: usize,
        /// Usable pixels found.
        unmasked: usize,
        /// Minimum pixels the fit requires.
        needed: usize,
    },
}

/// Aperture geometry relative to a trace, in spatial pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApertureProfile {
    /// Source half-width; the aperture spans `2 * source_half_width + 1` rows
    pub source_half_width: usize,
    /// Rows in each of the two sky strips
    pub sky_half_width: usize,
    /// Gap between the aperture edge and each sky strip
    pub sky_separation: usize,
    /// Degree of the sky polynomial across the spatial direction
    pub sky_degree: usize,
}

impl Default for ApertureProfile {
    fn default() -> Self {
        Self {
            source_half_width: 10,
            sky_half_width: 5,
            sky_separation: 0,
            sky_degree: 1,
        }
    }
}

/// Sub-pixel spatial coordinate assignment for the Marsh89 surface fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuadratureMode {
    /// Exact fractional offset from the trace center
    Linear,
    /// Offset rounded to the pixel grid
    Nearest,
}

/// Which extraction algorithm to run, with its tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExtractionAlgorithm {
    /// Fixed-aperture summation with sky subtraction
    Tophat,
    /// Per-column optimal extraction (Horne 1986)
    Horne86 {
        /// Span of the profile smoother as a fraction of the aperture
        smoothing_span: f64,
        /// Rejection threshold in sigma for outlier clipping
        clip_sigma: f64,
        /// Cap on rejection iterations per column
        max_iterations: usize,
    },
    /// Global polynomial-profile optimal extraction (Marsh 1989)
    Marsh89 {
        /// Surface order across the spatial direction
        spatial_order: usize,
        /// Surface order along the dispersion direction
        dispersion_order: usize,
        /// Sub-pixel coordinate assignment
        quadrature: QuadratureMode,
        /// Surface-fit outlier rejection passes
        n_reject: usize,
    },
}

impl ExtractionAlgorithm {
    /// Horne86 with the usual tuning.
    pub fn horne() -> Self {
        Self::Horne86 {
            smoothing_span: 0.5,
            clip_sigma: 5.0,
            max_iterations: 10,
        }
    }

    /// Marsh89 with the usual tuning.
    pub fn marsh() -> Self {
        Self::Marsh89 {
            spatial_order: 4,
            dispersion_order: 4,
            quadrature: QuadratureMode::Linear,
            n_reject: 2,
        }
    }
}

/// A 1-D spectrum with append-only calibration enrichment.
///
/// Counts and their uncertainties are set at construction; wavelengths and
/// fluxes are attached by the later calibration stages and can be set only
/// once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSpectrum {
    count: Vec<f64>,
    count_err: Vec<f64>,
    wavelength: Option<Vec<f64>>,
    flux: Option<Vec<f64>>,
    flux_err: Option<Vec<f64>>,
}

impl ExtractedSpectrum {
    /// Build from counts and their uncertainties.
    ///
    /// Panics when lengths differ or an uncertainty is negative.
    pub fn new(count: Vec<f64>, count_err: Vec<f64>) -> Self {
        assert_eq!(count.len(), count_err.len(), "count and error lengths differ");
        assert!(
            count_err.iter().all(|e| *e >= 0.0),
            "count uncertainties must be non-negative"
        );
        Self {
            count,
            count_err,
            wavelength: None,
            flux: None,
            flux_err: None,
        }
    }

    /// Dispersion length.
    pub fn len(&self) -> usize {
        self.count.len()
    }

    /// True for a zero-length spectrum.
    pub fn is_empty(&self) -> bool {
        self.count.is_empty()
    }

    pub fn count(&self) -> &[f64] {
        &self.count
    }

    pub fn count_err(&self) -> &[f64] {
        &self.count_err
    }

    pub fn wavelength(&self) -> Option<&[f64]> {
        self.wavelength.as_deref()
    }

    pub fn flux(&self) -> Option<&[f64]> {
        self.flux.as_deref()
    }

    pub fn flux_err(&self) -> Option<&[f64]> {
        self.flux_err.as_deref()
    }

    /// Attach the wavelength axis. Panics if already set or mis-sized.
    pub fn set_wavelength(&mut self, wavelength: Vec<f64>) {
        assert!(self.wavelength.is_none(), "wavelength axis already attached");
        assert_eq!(wavelength.len(), self.count.len(), "wavelength length differs");
        self.wavelength = Some(wavelength);
    }

    /// Attach calibrated fluxes. Panics if already set, mis-sized, or an
    /// uncertainty is negative.
    pub fn set_flux(&mut self, flux: Vec<f64>, flux_err: Vec<f64>) {
        assert!(self.flux.is_none(), "flux already attached");
        assert_eq!(flux.len(), self.count.len(), "flux length differs");
        assert_eq!(flux_err.len(), self.count.len(), "flux error length differs");
        assert!(
            flux_err.iter().all(|e| *e >= 0.0),
            "flux uncertainties must be non-negative"
        );
        self.flux = Some(flux);
        self.flux_err = Some(flux_err);
    }
}

/// Observed-minus-model diagnostic, same shape as the source frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualImage {
    data: Array2<f64>,
}

impl ResidualImage {
    pub(crate) fn new(data: Array2<f64>) -> Self {
        Self { data }
    }

    /// Residual values, `[spatial, dispersion]`.
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }
}

/// Row spans one column's extraction touches.
#[derive(Debug, Clone)]
pub(crate) struct ColumnWindows {
    /// Source aperture rows, inclusive
    pub source: std::ops::RangeInclusive<usize>,
    /// Rows of both sky strips
    pub sky: Vec<usize>,
}

/// Resolve the aperture geometry at one column, refusing to truncate.
pub(crate) fn column_windows(
    center: f64,
    profile: &ApertureProfile,
    n_spatial: usize,
    column: usize,
) -> Result<ColumnWindows, ExtractError> {
    let c = center.round() as isize;
    let s = profile.source_half_width as isize;
    let gap = profile.sky_separation as isize;
    let w = profile.sky_half_width as isize;

    let src_lo = c - s;
    let src_hi = c + s;
    let (lo, hi) = if w > 0 {
        (src_lo - gap - w, src_hi + gap + w)
    } else {
        (src_lo, src_hi)
    };
    if lo < 0 || hi >= n_spatial as isize {
        return Err(ExtractError::ApertureOutOfBounds {
            column,
            lo,
            hi,
            n_spatial,
        });
    }

    let mut sky = Vec::with_capacity(2 * profile.sky_half_width);
    for row in (src_lo - gap - w)..(src_lo - gap) {
        sky.push(row as usize);
    }
    for row in (src_hi + gap + 1)..=(src_hi + gap + w) {
        sky.push(row as usize);
    }
    Ok(ColumnWindows {
        source: (src_lo as usize)..=(src_hi as usize),
        sky,
    })
}

/// Variance-weighted profile sum over one column.
///
/// Returns `(count, variance)` for the pixels where `usable` holds, or
/// `None` when the weights are degenerate.
pub(crate) fn optimal_sum(
    net: &[f64],
    prof: &[f64],
    var: &[f64],
    usable: &[bool],
) -> Option<(f64, f64)> {
    let mut num = 0.0;
    let mut den = 0.0;
    let mut psum = 0.0;
    for i in 0..net.len() {
        if usable[i] && var[i] > 0.0 {
            num += prof[i] * net[i] / var[i];
            den += prof[i] * prof[i] / var[i];
            psum += prof[i];
        }
    }
    if den <= 0.0 || psum <= 0.0 {
        return None;
    }
    Some((num / den, psum / den))
}

/// Extracts 1-D spectra from frames along fitted traces.
#[derive(Debug, Clone)]
pub struct SpectralExtractor {
    profile: ApertureProfile,
}

impl SpectralExtractor {
    pub fn new(profile: ApertureProfile) -> Self {
        assert!(profile.source_half_width >= 1, "aperture needs at least 3 rows");
        Self { profile }
    }

    /// Aperture geometry in use.
    pub fn profile(&self) -> &ApertureProfile {
        &self.profile
    }

    /// Extract one trace with the chosen algorithm.
    ///
    /// # Errors
    /// [`ExtractError::ApertureOutOfBounds`] when the geometry leaves the
    /// frame; [`ExtractError::DegenerateFit`] when a sky or profile fit has
    /// too few usable pixels.
    pub fn extract(
        &self,
        frame: &Frame,
        trace: &Trace,
        algorithm: ExtractionAlgorithm,
    ) -> Result<(ExtractedSpectrum, ResidualImage), ExtractError> {
        assert_eq!(
            trace.len(),
            frame.n_dispersion(),
            "trace must cover every dispersion column"
        );
        match algorithm {
            ExtractionAlgorithm::Tophat => tophat::extract(frame, trace, &self.profile),
            ExtractionAlgorithm::Horne86 {
                smoothing_span,
                clip_sigma,
                max_iterations,
            } => horne::extract(
                frame,
                trace,
                &self.profile,
                smoothing_span,
                clip_sigma,
                max_iterations,
            ),
            ExtractionAlgorithm::Marsh89 {
                spatial_order,
                dispersion_order,
                quadrature,
                n_reject,
            } => marsh::extract(
                frame,
                trace,
                &self.profile,
                spatial_order,
                dispersion_order,
                quadrature,
                n_reject,
            ),
        }
    }

    /// Extract several traces in parallel.
    pub fn extract_all(
        &self,
        frame: &Frame,
        traces: &[Trace],
        algorithm: ExtractionAlgorithm,
    ) -> Result<Vec<(ExtractedSpectrum, ResidualImage)>, ExtractError> {
        traces
            .par_iter()
            .map(|trace| self.extract(frame, trace, algorithm))
            .collect()
    }

    /// Sum an arc frame over `arc_half_width` rows around the trace at every
    /// column, without background fitting. Rows are clamped to the frame and
    /// masked pixels are skipped.
    pub fn extract_arc(&self, frame: &Frame, trace: &Trace, arc_half_width: usize) -> Vec<f64> {
        assert_eq!(
            trace.len(),
            frame.n_dispersion(),
            "trace must cover every dispersion column"
        );
        let n_rows = frame.n_spatial();
        let mut spectrum = Vec::with_capacity(frame.n_dispersion());
        for (col, &center) in trace.centers.iter().enumerate() {
            let c = center.round() as isize;
            let lo = (c - arc_half_width as isize).max(0) as usize;
            let hi = ((c + arc_half_width as isize) as usize).min(n_rows - 1);
            let mut sum = 0.0;
            for row in lo..=hi {
                if !frame.is_masked(row, col) {
                    sum += frame.image()[[row, col]];
                }
            }
            spectrum.push(sum);
        }
        debug!(
            "arc spectrum sampled over +/-{arc_half_width} rows, {} columns",
            spectrum.len()
        );
        spectrum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameMeta;

    #[test]
    fn test_window_geometry_with_gap() {
        let profile = ApertureProfile {
            source_half_width: 3,
            sky_half_width: 2,
            sky_separation: 1,
            sky_degree: 1,
        };
        let w = column_windows(10.0, &profile, 32, 0).unwrap();
        assert_eq!(w.source, 7..=13);
        assert_eq!(w.sky, vec![4, 5, 15, 16]);
    }

    #[test]
    fn test_sky_strip_out_of_bounds_is_rejected() {
        let profile = ApertureProfile {
            source_half_width: 3,
            sky_half_width: 5,
            sky_separation: 0,
            sky_degree: 1,
        };
        // Source fits (rows 2..=8) but the lower sky strip would need
        // negative rows.
        let err = column_windows(5.0, &profile, 32, 7).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::ApertureOutOfBounds { column: 7, lo, .. } if lo < 0
        ));
    }

    #[test]
    fn test_zero_sky_width_needs_only_the_source() {
        let profile = ApertureProfile {
            source_half_width: 3,
            sky_half_width: 0,
            sky_separation: 0,
            sky_degree: 0,
        };
        let w = column_windows(5.0, &profile, 32, 0).unwrap();
        assert_eq!(w.source, 2..=8);
        assert!(w.sky.is_empty());
    }

    #[test]
    fn test_spectrum_enrichment_is_append_only() {
        let mut spectrum = ExtractedSpectrum::new(vec![1.0, 2.0], vec![0.1, 0.2]);
        spectrum.set_wavelength(vec![5000.0, 5004.0]);
        spectrum.set_flux(vec![1.0e-15, 2.0e-15], vec![1.0e-17, 2.0e-17]);
        assert_eq!(spectrum.wavelength().unwrap().len(), 2);
        assert_eq!(spectrum.flux().unwrap().len(), 2);
    }

    #[test]
    #[should_panic(expected = "already attached")]
    fn test_wavelength_cannot_be_rewritten() {
        let mut spectrum = ExtractedSpectrum::new(vec![1.0], vec![0.1]);
        spectrum.set_wavelength(vec![5000.0]);
        spectrum.set_wavelength(vec![6000.0]);
    }

    #[test]
    fn test_optimal_sum_matches_plain_sum_for_flat_profile() {
        // Uniform variance and a flat profile reduce the optimal sum to the
        // arithmetic sum.
        let net = vec![4.0, 6.0, 10.0, 6.0, 4.0];
        let prof = vec![0.2; 5];
        let var = vec![2.0; 5];
        let usable = vec![true; 5];
        let (count, _) = optimal_sum(&net, &prof, &var, &usable).unwrap();
        approx::assert_relative_eq!(count, 30.0, max_relative = 1.0e-12);
    }

    #[test]
    fn test_arc_extraction_clamps_at_edges() {
        let image = ndarray::Array2::from_elem((8, 4), 2.0);
        let frame = Frame::from_electrons(image, FrameMeta::default());
        let trace = Trace {
            centers: vec![1.0, 3.0, 6.0, 7.0],
            fwhm: vec![2.0; 4],
            confidence: vec![1.0; 4],
        };
        let extractor = SpectralExtractor::new(ApertureProfile::default());
        let arc = extractor.extract_arc(&frame, &trace, 3);

        // Windows near the edge cover fewer rows.
        approx::assert_relative_eq!(arc[0], 10.0, max_relative = 1.0e-12);
        approx::assert_relative_eq!(arc[1], 14.0, max_relative = 1.0e-12);
        approx::assert_relative_eq!(arc[3], 8.0, max_relative = 1.0e-12);
    }
}
