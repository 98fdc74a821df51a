//! Per-column sky background estimation shared by the extraction
//! algorithms.

use crate::extract::{ColumnWindows, ExtractError};
use crate::frame::Frame;
use spec_math::polynomial::polyfit;

/// One column's fitted sky.
#[derive(Debug, Clone)]
pub(crate) struct SkyFit {
    /// Sky estimate at each source-aperture row, low row first
    pub values: Vec<f64>,
    /// Residual variance of the sky fit, per pixel
    pub variance: f64,
    /// Sky pixels the fit used
    pub n_sky: usize,
}

impl SkyFit {
    /// A zero sky for extractions configured without sky strips.
    pub fn zero(n_source: usize) -> Self {
        Self {
            values: vec![0.0; n_source],
            variance: 0.0,
            n_sky: 0,
        }
    }
}

/// Fit the sky polynomial over both strips and evaluate it across the
/// source rows.
///
/// # Errors
/// [`ExtractError::DegenerateFit`] when fewer unmasked sky pixels remain
/// than the polynomial needs.
pub(crate) fn fit_sky(
    frame: &Frame,
    column: usize,
    windows: &ColumnWindows,
    degree: usize,
) -> Result<SkyFit, ExtractError> {
    let n_source = windows.source.clone().count();
    if windows.sky.is_empty() {
        return Ok(SkyFit::zero(n_source));
    }

    let mut rows = Vec::with_capacity(windows.sky.len());
    let mut values = Vec::with_capacity(windows.sky.len());
    for &row in &windows.sky {
        if !frame.is_masked(row, column) {
            rows.push(row as f64);
            values.push(frame.image()[[row, column]]);
        }
    }

    let needed = degree + 1;
    if rows.len() < needed {
        return Err(ExtractError::DegenerateFit {
            column,
            unmasked: rows.len(),
            needed,
        });
    }

    let poly = polyfit(&rows, &values, degree).map_err(|_| ExtractError::DegenerateFit {
        column,
        unmasked: rows.len(),
        needed,
    })?;

    // Residual variance of the fit; zero when the sky is exactly polynomial.
    let n_free = rows.len().saturating_sub(needed);
    let variance = if n_free > 0 {
        let sum_sq: f64 = rows
            .iter()
            .zip(&values)
            .map(|(&r, &v)| {
                let resid = v - poly.eval(r);
                resid * resid
            })
            .sum();
        sum_sq / n_free as f64
    } else {
        0.0
    };

    let fitted = windows.source.clone().map(|row| poly.eval(row as f64)).collect();
    Ok(SkyFit {
        values: fitted,
        variance,
        n_sky: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{column_windows, ApertureProfile};
    use crate::frame::FrameMeta;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn sloped_frame() -> Frame {
        // Sky varies linearly with row; the source sits on top of it.
        let image = Array2::from_shape_fn((40, 4), |(row, _)| 3.0 + 0.5 * row as f64);
        Frame::from_electrons(image, FrameMeta::default())
    }

    fn profile() -> ApertureProfile {
        ApertureProfile {
            source_half_width: 4,
            sky_half_width: 4,
            sky_separation: 2,
            sky_degree: 1,
        }
    }

    #[test]
    fn test_linear_sky_recovered_exactly() {
        let frame = sloped_frame();
        let windows = column_windows(20.0, &profile(), 40, 1).unwrap();
        let sky = fit_sky(&frame, 1, &windows, 1).unwrap();

        assert_eq!(sky.values.len(), 9);
        assert_eq!(sky.n_sky, 8);
        for (i, row) in windows.source.clone().enumerate() {
            assert_relative_eq!(sky.values[i], 3.0 + 0.5 * row as f64, epsilon = 1.0e-9);
        }
        assert!(sky.variance < 1.0e-12);
    }

    #[test]
    fn test_masked_sky_pixels_can_starve_the_fit() {
        let frame = sloped_frame();
        let windows = column_windows(20.0, &profile(), 40, 2).unwrap();

        // Mask all but one sky pixel.
        let mut mask = Array2::from_elem((40, 4), false);
        for &row in &windows.sky[..windows.sky.len() - 1] {
            mask[[row, 2]] = true;
        }
        let frame = Frame::from_electrons(frame.image().clone(), FrameMeta::default())
            .with_mask(mask);

        let err = fit_sky(&frame, 2, &windows, 1).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::DegenerateFit { column: 2, unmasked: 1, needed: 2 }
        ));
    }

    #[test]
    fn test_no_sky_strips_mean_zero_sky() {
        let frame = sloped_frame();
        let p = ApertureProfile {
            sky_half_width: 0,
            ..profile()
        };
        let windows = column_windows(20.0, &p, 40, 0).unwrap();
        let sky = fit_sky(&frame, 0, &windows, 1).unwrap();
        assert_eq!(sky.n_sky, 0);
        assert!(sky.values.iter().all(|&v| v == 0.0));
    }
}
