//! Frame rectification.
//!
//! Straightens a curved trace so it runs along a single spatial row. Each
//! dispersion column is band-limited upsampled by FFT zero-padding,
//! circularly shifted by the rounded upsampled offset between its trace
//! center and the reference column's center, and FFT-truncated back to
//! native resolution. Circular shifts leave a column's mean untouched, so
//! per-column flux survives to rounding error. Diagnostic transform; the
//! output frame carries no bad-pixel mask.

use crate::frame::Frame;
use crate::trace::Trace;
use log::debug;
use num_complex::Complex;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Rectification settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectifyConfig {
    /// Integer upsampling factor for sub-pixel shifts
    pub upsample: usize,
}

impl Default for RectifyConfig {
    fn default() -> Self {
        Self { upsample: 10 }
    }
}

/// Straightens frames along a fitted trace.
#[derive(Debug, Clone)]
pub struct Rectifier {
    config: RectifyConfig,
}

impl Rectifier {
    pub fn new(config: RectifyConfig) -> Self {
        assert!(config.upsample >= 1, "upsample factor must be at least 1");
        Self { config }
    }

    /// Shift every column so the trace lands on the reference (middle)
    /// column's center.
    ///
    /// Panics if the trace length disagrees with the frame's dispersion
    /// extent.
    pub fn rectify(&self, frame: &Frame, trace: &Trace) -> Frame {
        let n_rows = frame.n_spatial();
        let n_disp = frame.n_dispersion();
        assert_eq!(
            trace.len(),
            n_disp,
            "trace must cover every dispersion column"
        );

        let factor = self.config.upsample;
        let m = n_rows * factor;
        let mut planner = FftPlanner::new();
        let fft_n = planner.plan_fft_forward(n_rows);
        let ifft_m = planner.plan_fft_inverse(m);
        let fft_m = planner.plan_fft_forward(m);
        let ifft_n = planner.plan_fft_inverse(n_rows);

        let reference = trace.centers[n_disp / 2];
        debug!(
            "rectifying {n_rows}x{n_disp} frame to row {reference:.2} at {factor}x upsampling"
        );

        let columns: Vec<Vec<f64>> = (0..n_disp)
            .into_par_iter()
            .map(|col| {
                let column: Vec<f64> = (0..n_rows).map(|row| frame.image()[[row, col]]).collect();
                let shift =
                    ((trace.centers[col] - reference) * factor as f64).round() as isize;
                if shift == 0 {
                    return column;
                }
                let mut up = upsample(&column, factor, &fft_n, &ifft_m);
                // Positive shift moves the feature toward lower rows.
                if shift > 0 {
                    up.rotate_left(shift as usize % m);
                } else {
                    up.rotate_right(shift.unsigned_abs() % m);
                }
                downsample(&up, n_rows, &fft_m, &ifft_n)
            })
            .collect();

        let image = ndarray::Array2::from_shape_fn((n_rows, n_disp), |(row, col)| {
            columns[col][row]
        });
        Frame::from_electrons(image, frame.meta().clone())
    }
}

/// Band-limited upsample by spectrum zero-padding. The even-length Nyquist
/// bin is split between its positive and negative images to keep the
/// output real.
fn upsample(
    x: &[f64],
    factor: usize,
    fft: &Arc<dyn Fft<f64>>,
    ifft: &Arc<dyn Fft<f64>>,
) -> Vec<f64> {
    let n = x.len();
    let m = n * factor;
    if factor == 1 {
        return x.to_vec();
    }

    let mut buffer: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft.process(&mut buffer);

    let mut padded = vec![Complex::new(0.0, 0.0); m];
    let half = n / 2;
    for k in 0..n {
        if k == half && n % 2 == 0 {
            padded[half] = buffer[half] * 0.5;
            padded[m - half] = buffer[half] * 0.5;
        } else if k <= half {
            // Bin half is a positive frequency when n is odd.
            padded[k] = buffer[k];
        } else {
            padded[m - (n - k)] = buffer[k];
        }
    }
    ifft.process(&mut padded);
    padded.iter().map(|c| c.re / n as f64).collect()
}

/// Inverse of [`upsample`]: truncate the spectrum back to `n` samples,
/// recombining the split Nyquist bins.
fn downsample(y: &[f64], n: usize, fft: &Arc<dyn Fft<f64>>, ifft: &Arc<dyn Fft<f64>>) -> Vec<f64> {
    let m = y.len();
    if m == n {
        return y.to_vec();
    }

    let mut buffer: Vec<Complex<f64>> = y.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft.process(&mut buffer);

    let mut trimmed = vec![Complex::new(0.0, 0.0); n];
    let half = n / 2;
    for (k, out) in trimmed.iter_mut().enumerate() {
        if k == half && n % 2 == 0 {
            *out = buffer[half] + buffer[m - half];
        } else if k <= half {
            *out = buffer[k];
        } else {
            *out = buffer[m - (n - k)];
        }
    }
    ifft.process(&mut trimmed);
    trimmed.iter().map(|c| c.re / m as f64).collect()
}
