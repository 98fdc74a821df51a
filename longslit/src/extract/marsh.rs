//! Global-profile optimal extraction (Marsh 1989).
//!
//! One polynomial surface in (spatial offset, dispersion position) is fit by
//! weighted least squares to the normalized cross-sections of every column
//! jointly, so columns with little signal borrow their profile shape from
//! the rest of the trace. The fitted surface feeds the same
//! variance-weighted sum as the per-column algorithm.

use crate::extract::{
    column_windows, fit_sky, optimal_sum, ApertureProfile, ExtractError, ExtractedSpectrum,
    QuadratureMode, ResidualImage,
};
use crate::frame::Frame;
use crate::trace::Trace;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Sample rejection threshold, in units of the weighted fit RMS.
const REJECT_SIGMA: f64 = 4.0;
/// Singular-value cutoff for the surface solve.
const SVD_EPS: f64 = 1.0e-12;

struct ColumnData {
    rows: Vec<usize>,
    sky: Vec<f64>,
    net: Vec<f64>,
    var: Vec<f64>,
    usable: Vec<bool>,
}

/// One normalized-profile observation feeding the surface fit.
struct Sample {
    u: f64,
    v: f64,
    y: f64,
    w: f64,
}

pub(crate) fn extract(
    frame: &Frame,
    trace: &Trace,
    profile: &ApertureProfile,
    spatial_order: usize,
    dispersion_order: usize,
    quadrature: QuadratureMode,
    n_reject: usize,
) -> Result<(ExtractedSpectrum, ResidualImage), ExtractError> {
    let n_disp = frame.n_dispersion();
    let n_rows = frame.n_spatial();
    let scale = profile.source_half_width as f64;

    // First pass: per-column sky fits and normalized profile samples.
    // Columns whose net flux is not positive contribute no samples but are
    // still extracted against the interpolated surface afterwards.
    let mut columns = Vec::with_capacity(n_disp);
    let mut samples = Vec::new();
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

        let total: f64 = net
            .iter()
            .zip(&usable)
            .filter(|(_, u)| **u)
            .map(|(n, _)| n)
            .sum();
        if total > 0.0 {
            for (i, &row) in rows.iter().enumerate() {
                if !usable[i] || var[i] <= 0.0 {
                    continue;
                }
                samples.push(Sample {
                    u: spatial_coord(row, trace.centers[col], scale, quadrature),
                    v: dispersion_coord(col, n_disp),
                    y: net[i] / total,
                    w: total * total / var[i],
                });
            }
        }
        columns.push(ColumnData {
            rows,
            sky: sky.values,
            net,
            var,
            usable,
        });
    }

    let coeffs = fit_surface(samples, spatial_order, dispersion_order, n_reject)?;

    // Second pass: evaluate the surface at every column, renormalize, and
    // apply the optimal sum.
    let mut count = Vec::with_capacity(n_disp);
    let mut count_err = Vec::with_capacity(n_disp);
    let mut residual = frame.image().clone();
    for (col, cd) in columns.iter().enumerate() {
        let v = dispersion_coord(col, n_disp);
        let mut prof: Vec<f64> = cd
            .rows
            .iter()
            .map(|&row| {
                let u = spatial_coord(row, trace.centers[col], scale, quadrature);
                eval_surface(&coeffs, u, v, spatial_order, dispersion_order).max(0.0)
            })
            .collect();
        let n_usable = cd.usable.iter().filter(|u| **u).count();
        let total: f64 = prof.iter().sum();
        if total <= 0.0 {
            return Err(ExtractError::DegenerateFit {
                column: col,
                unmasked: n_usable,
                needed: 1,
            });
        }
        for p in &mut prof {
            *p /= total;
        }

        let (sum, sum_var) =
            optimal_sum(&cd.net, &prof, &cd.var, &cd.usable).ok_or(ExtractError::DegenerateFit {
                column: col,
                unmasked: n_usable,
                needed: 1,
            })?;
        for (i, &row) in cd.rows.iter().enumerate() {
            residual[[row, col]] = frame.image()[[row, col]] - cd.sky[i] - sum * prof[i];
        }
        count.push(sum);
        count_err.push(sum_var.max(0.0).sqrt());
    }

    Ok((
        ExtractedSpectrum::new(count, count_err),
        ResidualImage::new(residual),
    ))
}

fn spatial_coord(row: usize, center: f64, scale: f64, quadrature: QuadratureMode) -> f64 {
    let offset = match quadrature {
        QuadratureMode::Linear => row as f64 - center,
        QuadratureMode::Nearest => row as f64 - center.round(),
    };
    offset / scale
}

fn dispersion_coord(col: usize, n_disp: usize) -> f64 {
    if n_disp > 1 {
        2.0 * col as f64 / (n_disp as f64 - 1.0) - 1.0
    } else {
        0.0
    }
}

/// Weighted least-squares surface fit with iterative sample rejection.
///
/// The surface spans all columns, so a starved fit reports column 0.
fn fit_surface(
    mut samples: Vec<Sample>,
    spatial_order: usize,
    dispersion_order: usize,
    n_reject: usize,
) -> Result<DVector<f64>, ExtractError> {
    let n_basis = (spatial_order + 1) * (dispersion_order + 1);
    let mut coeffs = solve_surface(&samples, spatial_order, dispersion_order, n_basis)?;

    for pass in 0..n_reject {
        let resid: Vec<f64> = samples
            .iter()
            .map(|s| {
                let model = eval_surface(&coeffs, s.u, s.v, spatial_order, dispersion_order);
                s.w.sqrt() * (s.y - model)
            })
            .collect();
        let rms = (resid.iter().map(|r| r * r).sum::<f64>() / resid.len() as f64).sqrt();
        if rms <= 0.0 {
            break;
        }
        let cut = REJECT_SIGMA * rms;
        let before = samples.len();
        let kept: Vec<Sample> = samples
            .into_iter()
            .zip(&resid)
            .filter(|(_, r)| r.abs() <= cut)
            .map(|(s, _)| s)
            .collect();
        // A starved refit would be worse than keeping the current surface.
        if kept.len() == before || kept.len() < n_basis {
            break;
        }
        debug!(
            "profile surface pass {pass} rejected {} of {before} samples",
            before - kept.len()
        );
        samples = kept;
        coeffs = solve_surface(&samples, spatial_order, dispersion_order, n_basis)?;
    }
    Ok(coeffs)
}

fn solve_surface(
    samples: &[Sample],
    spatial_order: usize,
    dispersion_order: usize,
    n_basis: usize,
) -> Result<DVector<f64>, ExtractError> {
    if samples.len() < n_basis {
        return Err(ExtractError::DegenerateFit {
            column: 0,
            unmasked: samples.len(),
            needed: n_basis,
        });
    }
    let mut a = DMatrix::zeros(samples.len(), n_basis);
    let mut b = DVector::zeros(samples.len());
    for (s, sample) in samples.iter().enumerate() {
        let sw = sample.w.sqrt();
        let mut k = 0;
        let mut up = 1.0;
        for _ in 0..=spatial_order {
            let mut vp = 1.0;
            for _ in 0..=dispersion_order {
                a[(s, k)] = sw * up * vp;
                vp *= sample.v;
                k += 1;
            }
            up *= sample.u;
        }
        b[s] = sw * sample.y;
    }
    a.svd(true, true)
        .solve(&b, SVD_EPS)
        .map_err(|_| ExtractError::DegenerateFit {
            column: 0,
            unmasked: samples.len(),
            needed: n_basis,
        })
}

fn eval_surface(
    coeffs: &DVector<f64>,
    u: f64,
    v: f64,
    spatial_order: usize,
    dispersion_order: usize,
) -> f64 {
    let mut acc = 0.0;
    let mut k = 0;
    let mut up = 1.0;
    for _ in 0..=spatial_order {
        let mut vp = 1.0;
        for _ in 0..=dispersion_order {
            acc += coeffs[k] * up * vp;
            vp *= v;
            k += 1;
        }
        up *= u;
    }
    acc
}
