//! Flux calibration.
//!
//! Converts count spectra to physical flux in three steps: counts are
//! corrected for atmospheric extinction at the observing site, a
//! standard-star observation is ratioed against its literature spectrum to
//! form a smoothed sensitivity function, and science spectra are scaled by
//! that function.

mod extinction;
mod standards;

pub use extinction::{ExtinctionCurve, Site};
pub use standards::{standard_library, standard_star, StandardStar};

use crate::extract::ExtractedSpectrum;
use crate::frame::FrameMeta;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use spec_math::{boxcar, interp_clamped, median_filter};
use thiserror::Error;

/// Errors from sensitivity derivation and flux calibration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FluxError {
    /// No built-in literature table under this name.
    #[error("unknown standard star {name:?}")]
    UnknownStandard { name: String },
    /// No built-in extinction curve under this site tag.
    #[error("unknown observing site {name:?}")]
    UnknownSite { name: String },
    /// The spectrum and the reference table share no wavelengths.
    #[error(
        "spectrum [{requested_lo:.1}, {requested_hi:.1}] does not overlap \
         [{support_lo:.1}, {support_hi:.1}] angstrom"
    )]
    NoOverlap {
        requested_lo: f64,
        requested_hi: f64,
        support_lo: f64,
        support_hi: f64,
    },
    /// Wavelength calibration must run before flux calibration.
    #[error("spectrum has no wavelength axis")]
    MissingWavelength,
}

/// Clamped linear lookup in a table whose knots were checked at construction.
fn eval_table(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    interp_clamped(x, xs, ys).expect("interpolation table validated at construction")
}

fn axis_range(wavelength: &[f64]) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &w in wavelength {
        lo = lo.min(w);
        hi = hi.max(w);
    }
    (lo, hi)
}

/// Instrument response against wavelength.
///
/// Stored as `log10` of the count-rate-to-flux scale on the grid it was
/// derived over; evaluation interpolates in log space and clamps outside
/// the support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityFunction {
    wavelength: Vec<f64>,
    log_sensitivity: Vec<f64>,
}

impl SensitivityFunction {
    fn new(wavelength: Vec<f64>, log_sensitivity: Vec<f64>) -> Self {
        assert_eq!(wavelength.len(), log_sensitivity.len());
        assert!(wavelength.len() >= 2, "sensitivity needs at least two knots");
        assert!(
            wavelength.windows(2).all(|w| w[0] < w[1]),
            "sensitivity grid must increase"
        );
        Self {
            wavelength,
            log_sensitivity,
        }
    }

    /// Wavelength range the function was derived over, angstrom.
    pub fn support(&self) -> (f64, f64) {
        (self.wavelength[0], self.wavelength[self.wavelength.len() - 1])
    }

    /// Count-rate-to-flux scale at a wavelength, clamped at the support
    /// edges.
    pub fn sensitivity_at(&self, wavelength: f64) -> f64 {
        10f64.powf(eval_table(
            wavelength,
            &self.wavelength,
            &self.log_sensitivity,
        ))
    }
}

/// Smoothing applied to the raw sensitivity ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxConfig {
    /// Median filter window in samples, odd. Knocks out absorption lines
    /// and cosmetics in the standard observation.
    pub median_window: usize,
    /// Boxcar window in samples, odd.
    pub boxcar_window: usize,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            median_window: 7,
            boxcar_window: 5,
        }
    }
}

/// Derives sensitivity functions from standard stars and applies them to
/// science spectra.
#[derive(Debug, Clone, Default)]
pub struct FluxCalibrator {
    config: FluxConfig,
}

impl FluxCalibrator {
    /// Panics if either smoothing window is even.
    pub fn new(config: FluxConfig) -> Self {
        assert!(
            config.median_window % 2 == 1 && config.boxcar_window % 2 == 1,
            "smoothing windows must be odd"
        );
        Self { config }
    }

    /// Derive the instrument sensitivity from a standard-star observation.
    ///
    /// Extracted counts are converted to extinction-corrected count rates,
    /// ratioed against the literature spectrum, and the ratio is
    /// median-filtered then boxcar-smoothed before being stored on the
    /// observed wavelength grid.
    ///
    /// Pixels outside the literature table or with a non-positive count
    /// rate are dropped; fewer than two surviving pixels is a
    /// [`FluxError::NoOverlap`].
    ///
    /// Panics if `meta.exposure_s` is not positive.
    pub fn derive_sensitivity(
        &self,
        observed: &ExtractedSpectrum,
        standard_name: &str,
        meta: &FrameMeta,
    ) -> Result<SensitivityFunction, FluxError> {
        assert!(meta.exposure_s > 0.0, "exposure time must be positive");
        let wavelength = observed.wavelength().ok_or(FluxError::MissingWavelength)?;
        let star = standard_star(standard_name)?;
        let site: Site = meta.site.parse()?;
        let curve = ExtinctionCurve::for_site(site);
        let (star_lo, star_hi) = star.support();

        let mut grid = Vec::new();
        let mut ratio = Vec::new();
        let mut skipped = 0usize;
        for (&wl, &count) in wavelength.iter().zip(observed.count()) {
            if wl < star_lo || wl > star_hi {
                continue;
            }
            let rate = count * curve.correction_factor(wl, meta.airmass) / meta.exposure_s;
            if rate <= 0.0 {
                skipped += 1;
                continue;
            }
            grid.push(wl);
            ratio.push(star.flux_at(wl) / rate);
        }
        if grid.len() < 2 {
            let (obs_lo, obs_hi) = axis_range(wavelength);
            return Err(FluxError::NoOverlap {
                requested_lo: obs_lo,
                requested_hi: obs_hi,
                support_lo: star_lo,
                support_hi: star_hi,
            });
        }
        if skipped > 0 {
            debug!("dropped {skipped} non-positive count-rate pixels from the sensitivity fit");
        }
        // Red-to-blue dispersions come out decreasing; store increasing.
        if grid[0] > grid[grid.len() - 1] {
            grid.reverse();
            ratio.reverse();
        }

        let smoothed = boxcar(
            &median_filter(&ratio, self.config.median_window),
            self.config.boxcar_window,
        );
        let log_sensitivity = smoothed.iter().map(|s| s.log10()).collect();
        info!(
            "sensitivity derived against {} from {} of {} pixels over [{:.0}, {:.0}] angstrom",
            star.name(),
            grid.len(),
            wavelength.len(),
            grid[0],
            grid[grid.len() - 1],
        );
        Ok(SensitivityFunction::new(grid, log_sensitivity))
    }

    /// Scale a spectrum's counts into physical flux.
    ///
    /// Each pixel is corrected for extinction, divided by the exposure
    /// time, and multiplied by the sensitivity, with the sensitivity
    /// clamped at its support edges. Fails with [`FluxError::NoOverlap`]
    /// only when the spectrum lies entirely outside the support.
    ///
    /// Panics if the spectrum already carries fluxes or the exposure time
    /// is not positive.
    pub fn apply(
        &self,
        sensitivity: &SensitivityFunction,
        spectrum: &mut ExtractedSpectrum,
        meta: &FrameMeta,
    ) -> Result<(), FluxError> {
        assert!(meta.exposure_s > 0.0, "exposure time must be positive");
        let site: Site = meta.site.parse()?;
        let curve = ExtinctionCurve::for_site(site);
        let wavelength = spectrum
            .wavelength()
            .ok_or(FluxError::MissingWavelength)?
            .to_vec();
        let (support_lo, support_hi) = sensitivity.support();
        let (obs_lo, obs_hi) = axis_range(&wavelength);
        if obs_hi < support_lo || obs_lo > support_hi {
            return Err(FluxError::NoOverlap {
                requested_lo: obs_lo,
                requested_hi: obs_hi,
                support_lo,
                support_hi,
            });
        }

        let mut flux = Vec::with_capacity(wavelength.len());
        let mut flux_err = Vec::with_capacity(wavelength.len());
        for (i, &wl) in wavelength.iter().enumerate() {
            let scale = curve.correction_factor(wl, meta.airmass) * sensitivity.sensitivity_at(wl)
                / meta.exposure_s;
            flux.push(spectrum.count()[i] * scale);
            flux_err.push(spectrum.count_err()[i] * scale);
        }
        spectrum.set_flux(flux, flux_err);
        debug!(
            "flux calibration applied to {} pixels at airmass {:.2}",
            wavelength.len(),
            meta.airmass
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn meta() -> FrameMeta {
        FrameMeta {
            airmass: 1.3,
            exposure_s: 120.0,
            site: "orm".to_string(),
            ..Default::default()
        }
    }

    /// A smooth instrument response used to fabricate standard counts.
    fn true_sensitivity(wavelength: f64) -> f64 {
        2.0e-16 * (1.0 + 0.5 * (wavelength - 4000.0) / 4000.0)
    }

    /// Synthetic observation of hilt102 whose counts fold the literature
    /// flux through `true_sensitivity` and the site extinction.
    fn standard_observation() -> ExtractedSpectrum {
        let meta = meta();
        let star = standard_star("hilt102").unwrap();
        let curve = ExtinctionCurve::for_site(Site::RoqueDeLosMuchachos);
        let grid: Vec<f64> = (0..256).map(|i| 4000.0 + 15.0 * i as f64).collect();
        let counts: Vec<f64> = grid
            .iter()
            .map(|&wl| {
                star.flux_at(wl) * meta.exposure_s
                    / (curve.correction_factor(wl, meta.airmass) * true_sensitivity(wl))
            })
            .collect();
        let errs: Vec<f64> = counts.iter().map(|c| 0.01 * c).collect();
        let mut spectrum = ExtractedSpectrum::new(counts, errs);
        spectrum.set_wavelength(grid);
        spectrum
    }

    #[test]
    fn test_round_trip_recovers_literature_fluxes() {
        let calibrator = FluxCalibrator::new(FluxConfig::default());
        let observed = standard_observation();
        let sensitivity = calibrator
            .derive_sensitivity(&observed, "hilt102", &meta())
            .unwrap();

        let mut spectrum = observed.clone();
        calibrator
            .apply(&sensitivity, &mut spectrum, &meta())
            .unwrap();

        let star = standard_star("hilt102").unwrap();
        let wavelength = spectrum.wavelength().unwrap();
        let flux = spectrum.flux().unwrap();
        for (i, (&wl, &f)) in wavelength.iter().zip(flux).enumerate() {
            let lit = star.flux_at(wl);
            assert_relative_eq!(f, lit, max_relative = 0.05);
            // Away from the smoothing edges the recovery is exact.
            if i >= 5 && i + 6 <= flux.len() {
                assert_relative_eq!(f, lit, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn test_flux_errors_scale_with_counts() {
        let calibrator = FluxCalibrator::new(FluxConfig::default());
        let observed = standard_observation();
        let sensitivity = calibrator
            .derive_sensitivity(&observed, "hilt102", &meta())
            .unwrap();

        let mut spectrum = observed.clone();
        calibrator
            .apply(&sensitivity, &mut spectrum, &meta())
            .unwrap();

        let flux = spectrum.flux().unwrap();
        let flux_err = spectrum.flux_err().unwrap();
        assert_relative_eq!(flux_err[100] / flux[100], 0.01, max_relative = 1e-12);
    }

    #[test]
    fn test_standard_outside_table_is_an_error() {
        let grid: Vec<f64> = (0..32).map(|i| 9000.0 + 15.0 * i as f64).collect();
        let mut spectrum = ExtractedSpectrum::new(vec![1000.0; 32], vec![10.0; 32]);
        spectrum.set_wavelength(grid);

        let err = FluxCalibrator::default()
            .derive_sensitivity(&spectrum, "hilt102", &meta())
            .unwrap_err();
        assert!(
            matches!(err, FluxError::NoOverlap { support_hi, .. } if support_hi == 8100.0),
            "expected a range mismatch, got {err}"
        );
    }

    #[test]
    fn test_disjoint_science_spectrum_is_an_error() {
        let calibrator = FluxCalibrator::default();
        let sensitivity = calibrator
            .derive_sensitivity(&standard_observation(), "hilt102", &meta())
            .unwrap();

        let mut science = ExtractedSpectrum::new(vec![500.0; 16], vec![5.0; 16]);
        science.set_wavelength((0..16).map(|i| 9000.0 + 10.0 * i as f64).collect());
        let err = calibrator
            .apply(&sensitivity, &mut science, &meta())
            .unwrap_err();
        assert!(matches!(err, FluxError::NoOverlap { .. }));
        assert!(science.flux().is_none());
    }

    #[test]
    fn test_missing_wavelength_axis_is_an_error() {
        let spectrum = ExtractedSpectrum::new(vec![1.0; 8], vec![0.1; 8]);
        let err = FluxCalibrator::default()
            .derive_sensitivity(&spectrum, "hilt102", &meta())
            .unwrap_err();
        assert_eq!(err, FluxError::MissingWavelength);
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let observed = standard_observation();
        let err = FluxCalibrator::default()
            .derive_sensitivity(&observed, "vega", &meta())
            .unwrap_err();
        assert!(matches!(err, FluxError::UnknownStandard { .. }));

        let bad_site = FrameMeta {
            site: "lick".to_string(),
            ..meta()
        };
        let err = FluxCalibrator::default()
            .derive_sensitivity(&observed, "hilt102", &bad_site)
            .unwrap_err();
        assert!(matches!(err, FluxError::UnknownSite { name } if name == "lick"));
    }

    #[test]
    fn test_sensitivity_clamps_outside_support() {
        let sensitivity = FluxCalibrator::default()
            .derive_sensitivity(&standard_observation(), "hilt102", &meta())
            .unwrap();

        let (lo, hi) = sensitivity.support();
        assert_relative_eq!(lo, 4000.0);
        assert_relative_eq!(hi, 4000.0 + 15.0 * 255.0);
        assert_relative_eq!(sensitivity.sensitivity_at(3500.0), sensitivity.sensitivity_at(lo));
        assert_relative_eq!(sensitivity.sensitivity_at(9000.0), sensitivity.sensitivity_at(hi));
    }
}
