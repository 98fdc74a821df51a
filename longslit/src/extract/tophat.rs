//! Fixed-aperture extraction.
//!
//! Sums the sky-subtracted aperture at every column. The model behind the
//! residual image is the fitted sky plus a flat profile carrying the
//! extracted count, so a peaked source leaves a structured residual by
//! construction; that structure is what the optimal algorithms remove.

use crate::extract::{
    column_windows, fit_sky, ApertureProfile, ExtractError, ExtractedSpectrum, ResidualImage,
};
use crate::frame::Frame;
use crate::trace::Trace;

pub(crate) fn extract(
    frame: &Frame,
    trace: &Trace,
    profile: &ApertureProfile,
) -> Result<(ExtractedSpectrum, ResidualImage), ExtractError> {
    let n_disp = frame.n_dispersion();
    let n_rows = frame.n_spatial();
    let mut count = Vec::with_capacity(n_disp);
    let mut count_err = Vec::with_capacity(n_disp);
    let mut residual = frame.image().clone();

    for col in 0..n_disp {
        let windows = column_windows(trace.centers[col], profile, n_rows, col)?;
        let sky = fit_sky(frame, col, &windows, profile.sky_degree)?;

        let mut sum = 0.0;
        let mut variance = 0.0;
        let mut n_used = 0usize;
        for (i, row) in windows.source.clone().enumerate() {
            if frame.is_masked(row, col) {
                continue;
            }
            sum += frame.image()[[row, col]] - sky.values[i];
            variance += frame.variance()[[row, col]];
            n_used += 1;
        }
        if n_used == 0 {
            return Err(ExtractError::DegenerateFit {
                column: col,
                unmasked: 0,
                needed: 1,
            });
        }
        // Uncertainty of the subtracted sky level, scaled to the aperture.
        if sky.n_sky > 0 {
            variance += (n_used * n_used) as f64 / sky.n_sky as f64 * sky.variance;
        }

        let flat = sum / n_used as f64;
        for (i, row) in windows.source.clone().enumerate() {
            let model = if frame.is_masked(row, col) {
                sky.values[i]
            } else {
                sky.values[i] + flat
            };
            residual[[row, col]] = frame.image()[[row, col]] - model;
        }

        count.push(sum);
        count_err.push(variance.max(0.0).sqrt());
    }

    Ok((
        ExtractedSpectrum::new(count, count_err),
        ResidualImage::new(residual),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SpectralExtractor;
    use crate::frame::FrameMeta;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use spec_math::GaussianProfile;

    const BASELINE: f64 = 7.0;

    // Sky strips start 8 sigma from the trace so the wings under them are
    // below double precision.
    fn wide_profile() -> ApertureProfile {
        ApertureProfile {
            source_half_width: 10,
            sky_half_width: 5,
            sky_separation: 5,
            sky_degree: 1,
        }
    }

    fn gaussian_frame(amplitude: f64, center: f64, sigma: f64) -> Frame {
        let source = GaussianProfile::new(amplitude, center, sigma);
        let image = Array2::from_shape_fn((64, 8), |(row, _)| {
            BASELINE + source.pixel_value(row as f64)
        });
        Frame::from_electrons(image, FrameMeta::default())
    }

    fn flat_trace(center: f64, n_cols: usize) -> Trace {
        Trace {
            centers: vec![center; n_cols],
            fwhm: vec![4.7; n_cols],
            confidence: vec![1.0; n_cols],
        }
    }

    #[test]
    fn test_count_matches_analytic_integral() {
        let source = GaussianProfile::new(1000.0, 30.0, 2.0);
        let frame = gaussian_frame(1000.0, 30.0, 2.0);
        let extractor = SpectralExtractor::new(wide_profile());

        let (spectrum, _) = extractor
            .extract(&frame, &flat_trace(30.0, 8), crate::extract::ExtractionAlgorithm::Tophat)
            .unwrap();

        // Aperture rows 20..=40 integrate the profile over [19.5, 40.5];
        // the linear sky fit removes the flat baseline exactly.
        let expected = source.integral(19.5, 40.5);
        for col in 0..8 {
            assert_relative_eq!(spectrum.count()[col], expected, max_relative = 1.0e-9);
        }
    }

    #[test]
    fn test_masked_source_pixel_is_excluded() {
        let source = GaussianProfile::new(1000.0, 30.0, 2.0);
        let frame = gaussian_frame(1000.0, 30.0, 2.0);
        let mut mask = Array2::from_elem((64, 8), false);
        mask[[28, 3]] = true;
        let frame = Frame::from_electrons(frame.image().clone(), FrameMeta::default())
            .with_mask(mask);

        let extractor = SpectralExtractor::new(wide_profile());
        let (spectrum, _) = extractor
            .extract(&frame, &flat_trace(30.0, 8), crate::extract::ExtractionAlgorithm::Tophat)
            .unwrap();

        let full = source.integral(19.5, 40.5);
        assert_relative_eq!(
            spectrum.count()[3],
            full - source.pixel_value(28.0),
            max_relative = 1.0e-9
        );
        assert_relative_eq!(spectrum.count()[0], full, max_relative = 1.0e-9);
    }

    #[test]
    fn test_sky_out_of_bounds_is_an_error_not_a_truncation() {
        let frame = gaussian_frame(1000.0, 10.0, 2.5);
        let extractor = SpectralExtractor::new(ApertureProfile::default());

        // Default geometry needs rows down to 10 - 15 = -5.
        let err = extractor
            .extract(&frame, &flat_trace(10.0, 8), crate::extract::ExtractionAlgorithm::Tophat)
            .unwrap_err();
        assert!(matches!(err, ExtractError::ApertureOutOfBounds { .. }));
    }

    #[test]
    fn test_uncertainty_combines_poisson_and_read_noise() {
        let meta = FrameMeta {
            read_noise: 3.0,
            ..Default::default()
        };
        let image = Array2::from_elem((64, 4), BASELINE);
        let frame = Frame::from_electrons(image, meta);
        let extractor = SpectralExtractor::new(ApertureProfile::default());

        let (spectrum, _) = extractor
            .extract(&frame, &flat_trace(30.0, 4), crate::extract::ExtractionAlgorithm::Tophat)
            .unwrap();

        // 21 aperture pixels, each with variance 7 + 9; the flat sky fit is
        // exact so it adds nothing.
        assert_relative_eq!(spectrum.count()[0], 0.0, epsilon = 1.0e-9);
        assert_relative_eq!(
            spectrum.count_err()[0],
            (21.0 * 16.0_f64).sqrt(),
            max_relative = 1.0e-9
        );
    }

    #[test]
    fn test_residual_is_observed_minus_flat_model() {
        let frame = gaussian_frame(1000.0, 30.0, 2.0);
        let extractor = SpectralExtractor::new(wide_profile());
        let (spectrum, residual) = extractor
            .extract(&frame, &flat_trace(30.0, 8), crate::extract::ExtractionAlgorithm::Tophat)
            .unwrap();

        let flat = spectrum.count()[0] / 21.0;
        // At the trace center the source is far brighter than its aperture
        // mean, so the flat model under-subtracts there.
        assert!(residual.data()[[30, 0]] > 0.0);
        assert_relative_eq!(
            residual.data()[[30, 0]],
            frame.image()[[30, 0]] - BASELINE - flat,
            max_relative = 1.0e-9
        );
        // Outside the window the residual is the observed image.
        assert_relative_eq!(residual.data()[[5, 0]], frame.image()[[5, 0]]);
    }
}
