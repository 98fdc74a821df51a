//! Per-column optimal extraction (Horne 1986).
//!
//! Each column's sky-subtracted cross-section is smoothed into a normalized
//! non-negative profile, and the count is the variance-weighted profile sum.
//! Pixels whose residual from the profile model exceeds the clip threshold
//! are rejected one at a time, worst first.

use crate::extract::{
    column_windows, fit_sky, optimal_sum, ApertureProfile, ExtractError, ExtractedSpectrum,
    ResidualImage,
};
use crate::frame::Frame;
use crate::trace::Trace;
use log::debug;
use spec_math::{interp_clamped, local_linear};

/// Smoothing passes; passes after the first down-weight outliers.
const PROFILE_PASSES: usize = 2;
/// The local-regression smoother needs this many aperture rows.
const MIN_PROFILE_ROWS: usize = 4;

pub(crate) fn extract(
    frame: &Frame,
    trace: &Trace,
    profile: &ApertureProfile,
    smoothing_span: f64,
    clip_sigma: f64,
    max_iterations: usize,
) -> Result<(ExtractedSpectrum, ResidualImage), ExtractError> {
    assert!(
        smoothing_span > 0.0 && smoothing_span <= 1.0,
        "smoothing span must lie in (0, 1]"
    );
    let n_disp = frame.n_dispersion();
    let n_rows = frame.n_spatial();
    let mut count = Vec::with_capacity(n_disp);
    let mut count_err = Vec::with_capacity(n_disp);
    let mut residual = frame.image().clone();
    let mut n_clipped = 0usize;

    for col in 0..n_disp {
        let windows = column_windows(trace.centers[col], profile, n_rows, col)?;
        let sky = fit_sky(frame, col, &windows, profile.sky_degree)?;

        let rows: Vec<usize> = windows.source.clone().collect();
        let mut net = Vec::with_capacity(rows.len());
        let mut var = Vec::with_capacity(rows.len());
        let mut usable = Vec::with_capacity(rows.len());
        for (i, &row) in rows.iter().enumerate() {
            net.push(frame.image()[[row, col]] - sky.values[i]);
            var.push(frame.variance()[[row, col]]);
            usable.push(!frame.is_masked(row, col));
        }

        let prof = column_profile(col, &net, &usable, smoothing_span)?;

        let (mut sum, mut sum_var) =
            optimal_sum(&net, &prof, &var, &usable).ok_or_else(|| degenerate(col, &usable))?;
        for _ in 0..max_iterations {
            let Some(worst) = worst_outlier(&net, &prof, &var, &usable, sum, clip_sigma) else {
                break;
            };
            usable[worst] = false;
            n_clipped += 1;
            (sum, sum_var) =
                optimal_sum(&net, &prof, &var, &usable).ok_or_else(|| degenerate(col, &usable))?;
        }

        for (i, &row) in rows.iter().enumerate() {
            residual[[row, col]] = frame.image()[[row, col]] - sky.values[i] - sum * prof[i];
        }
        count.push(sum);
        count_err.push(sum_var.max(0.0).sqrt());
    }

    if n_clipped > 0 {
        debug!("horne extraction clipped {n_clipped} pixels over {n_disp} columns");
    }
    Ok((
        ExtractedSpectrum::new(count, count_err),
        ResidualImage::new(residual),
    ))
}

/// Normalized spatial profile for one column.
///
/// Masked rows are filled from their unmasked neighbors before smoothing so
/// a cosmic-ray hole does not dent the profile shape.
fn column_profile(
    column: usize,
    net: &[f64],
    usable: &[bool],
    smoothing_span: f64,
) -> Result<Vec<f64>, ExtractError> {
    let n = net.len();
    let n_usable = usable.iter().filter(|u| **u).count();

    let filled = if n_usable == n {
        net.to_vec()
    } else {
        let xs: Vec<f64> = (0..n).filter(|&i| usable[i]).map(|i| i as f64).collect();
        let ys: Vec<f64> = (0..n).filter(|&i| usable[i]).map(|i| net[i]).collect();
        if xs.len() < 2 {
            return Err(ExtractError::DegenerateFit {
                column,
                unmasked: xs.len(),
                needed: 2,
            });
        }
        let mut filled = Vec::with_capacity(n);
        for i in 0..n {
            if usable[i] {
                filled.push(net[i]);
            } else {
                let v = interp_clamped(i as f64, &xs, &ys).map_err(|_| {
                    ExtractError::DegenerateFit {
                        column,
                        unmasked: n_usable,
                        needed: 2,
                    }
                })?;
                filled.push(v);
            }
        }
        filled
    };

    let smoothed =
        local_linear(&filled, smoothing_span, PROFILE_PASSES).map_err(|_| {
            ExtractError::DegenerateFit {
                column,
                unmasked: n,
                needed: MIN_PROFILE_ROWS,
            }
        })?;

    let mut prof: Vec<f64> = smoothed.into_iter().map(|v| v.max(0.0)).collect();
    let total: f64 = prof.iter().sum();
    if total <= 0.0 {
        return Err(ExtractError::DegenerateFit {
            column,
            unmasked: n_usable,
            needed: 1,
        });
    }
    for p in &mut prof {
        *p /= total;
    }
    Ok(prof)
}

/// Index of the most discrepant usable pixel beyond the clip threshold.
fn worst_outlier(
    net: &[f64],
    prof: &[f64],
    var: &[f64],
    usable: &[bool],
    sum: f64,
    clip_sigma: f64,
) -> Option<usize> {
    let mut worst: Option<(usize, f64)> = None;
    for i in 0..net.len() {
        if !usable[i] || var[i] <= 0.0 {
            continue;
        }
        let resid = net[i] - sum * prof[i];
        let ratio = resid * resid / var[i];
        if ratio > clip_sigma * clip_sigma && worst.map_or(true, |(_, r)| ratio > r) {
            worst = Some((i, ratio));
        }
    }
    worst.map(|(i, _)| i)
}

fn degenerate(column: usize, usable: &[bool]) -> ExtractError {
    ExtractError::DegenerateFit {
        column,
        unmasked: usable.iter().filter(|u| **u).count(),
        needed: 1,
    }
}
