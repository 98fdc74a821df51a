//! Spectral trace location.
//!
//! The tracer partitions the dispersion axis into overlapping windows,
//! collapses each window into a spatial profile, and follows the requested
//! number of peaks across windows with a continuity-preferring assignment.
//! Faint windows are interpolated from their confident neighbors instead of
//! trusting a noisy peak search, and the final per-column curve is a
//! polynomial fit over the window centers with a shift-tolerance rejection
//! pass.

use crate::frame::Frame;
use arcfit::peaks::{find_peaks, PeakConfig};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use spec_math::gaussian::{fit_moments, FWHM_PER_SIGMA};
use spec_math::interp::interp_clamped;
use spec_math::polynomial::{polyfit, FitError, Polynomial};
use spec_math::stats::percentile;
use thiserror::Error;

/// Fallback width when a cross-section carries no usable signal.
const DEFAULT_SIGMA: f64 = 2.0;

/// Errors from the tracing stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    /// Fewer credible traces than the caller asked for.
    #[error("found {found} credible traces, {requested} requested")]
    NotFound {
        /// Traces the caller requested.
        requested: usize,
        /// Credible traces actually present.
        found: usize,
    },

    /// The trace polynomial could not be fit.
    #[error("trace fit failed: {0}")]
    Fit(#[from] FitError),
}

/// Tracing settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Number of overlapping dispersion windows
    pub n_windows: usize,
    /// Spatial search half-width around the previous accepted center, px
    pub trace_width: f64,
    /// Percentile of window prominences below which a window is treated as
    /// faint and interpolated instead of trusted
    pub faint_percentile: f64,
    /// Degree of the polynomial fit through the window centers
    pub fit_degree: usize,
    /// Window residual beyond which the window is dropped from the refit, px
    pub shift_tolerance: f64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            n_windows: 20,
            trace_width: 20.0,
            faint_percentile: 10.0,
            fit_degree: 3,
            shift_tolerance: 15.0,
        }
    }
}

/// The spatial path of one spectrum across the dispersion axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Spatial center per dispersion column
    pub centers: Vec<f64>,
    /// Local FWHM per dispersion column
    pub fwhm: Vec<f64>,
    /// Confidence per dispersion column, 1 where windows were measured and
    /// 0 where they were interpolated
    pub confidence: Vec<f64>,
}

impl Trace {
    /// Number of dispersion columns covered.
    pub fn len(&self) -> usize {
        self.centers.len()
    }

    /// True for a zero-length trace.
    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }
}

/// One dispersion window's accepted measurement for one trace.
#[derive(Debug, Clone, Copy)]
struct WindowMeasure {
    /// Dispersion coordinate of the window center
    x: f64,
    /// Accepted spatial center, if any
    center: Option<f64>,
    /// Prominence of the accepted peak
    prominence: f64,
}

/// Locates and follows spectral traces in a frame.
#[derive(Debug, Clone)]
pub struct ApertureTracer {
    config: TraceConfig,
}

impl ApertureTracer {
    pub fn new(config: TraceConfig) -> Self {
        assert!(config.n_windows > config.fit_degree, "need more windows than fit coefficients");
        assert!(config.trace_width >= 2.0, "trace width below 2 px cannot hold a centroid");
        Self { config }
    }

    /// Locate `n_spectra` traces, brightest-window evidence first, returned
    /// in spatial order.
    ///
    /// # Errors
    /// [`TraceError::NotFound`] when fewer than `n_spectra` credible traces
    /// exist in the frame.
    pub fn trace(&self, frame: &Frame, n_spectra: usize) -> Result<Vec<Trace>, TraceError> {
        assert!(n_spectra >= 1, "must request at least one trace");
        let n_disp = frame.n_dispersion();
        let n_rows = frame.n_spatial();
        assert!(
            n_disp >= self.config.n_windows,
            "frame has {n_disp} columns but {} windows were requested",
            self.config.n_windows
        );

        let peak_config = PeakConfig {
            prominence: 0.0,
            min_distance: 3,
            refine_window: 3,
        };

        // Nominal centers from the full-frame collapse seed the per-window
        // search and fix the spatial order of the output.
        let global = collapse(frame, 0, n_disp);
        let mut global_peaks = find_peaks(&global, &peak_config);
        global_peaks.sort_by(|a, b| {
            b.prominence
                .partial_cmp(&a.prominence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if global_peaks.len() < n_spectra {
            return Err(TraceError::NotFound {
                requested: n_spectra,
                found: global_peaks.len(),
            });
        }
        let mut nominal: Vec<f64> = global_peaks[..n_spectra]
            .iter()
            .map(|p| p.subpixel)
            .collect();
        nominal.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        // Follow each nominal center window by window, preferring spatial
        // continuity over raw intensity when peaks compete.
        let spacing = n_disp as f64 / self.config.n_windows as f64;
        let mut measures: Vec<Vec<WindowMeasure>> = vec![Vec::new(); n_spectra];
        let mut last: Vec<f64> = nominal.clone();
        for w in 0..self.config.n_windows {
            let x = (w as f64 + 0.5) * spacing;
            let lo = (x - spacing).floor().max(0.0) as usize;
            let hi = ((x + spacing).ceil() as usize).min(n_disp);
            let profile = collapse(frame, lo, hi);
            let peaks = find_peaks(&profile, &peak_config);

            let mut used = vec![false; peaks.len()];
            for t in 0..n_spectra {
                let nearest = peaks
                    .iter()
                    .enumerate()
                    .filter(|(i, p)| {
                        !used[*i] && (p.subpixel - last[t]).abs() <= self.config.trace_width
                    })
                    .min_by(|(_, a), (_, b)| {
                        (a.subpixel - last[t])
                            .abs()
                            .partial_cmp(&(b.subpixel - last[t]).abs())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                match nearest {
                    Some((i, peak)) => {
                        used[i] = true;
                        last[t] = peak.subpixel;
                        measures[t].push(WindowMeasure {
                            x,
                            center: Some(peak.subpixel),
                            prominence: peak.prominence,
                        });
                    }
                    None => {
                        debug!("window {w} has no peak near trace {t} (last {:.1})", last[t]);
                        measures[t].push(WindowMeasure {
                            x,
                            center: None,
                            prominence: 0.0,
                        });
                    }
                }
            }
        }

        // Demote faint windows, then keep only credible traces.
        let needed = self.config.fit_degree + 1;
        let mut credible: Vec<Vec<WindowMeasure>> = Vec::new();
        for series in measures.into_iter() {
            let demoted = self.demote_faint(series);
            let confident = demoted.iter().filter(|m| m.center.is_some()).count();
            if confident >= needed.max(2) {
                credible.push(demoted);
            }
        }
        if credible.len() < n_spectra {
            return Err(TraceError::NotFound {
                requested: n_spectra,
                found: credible.len(),
            });
        }

        let mut traces = Vec::with_capacity(n_spectra);
        for series in credible.into_iter().take(n_spectra) {
            traces.push(self.fit_trace(frame, &series, n_rows, n_disp)?);
        }
        info!("traced {} of {n_spectra} requested spectra", traces.len());
        Ok(traces)
    }

    /// Mark windows whose prominence falls below the configured percentile
    /// of this trace's measured windows as low-confidence.
    fn demote_faint(&self, mut series: Vec<WindowMeasure>) -> Vec<WindowMeasure> {
        let pool: Vec<f64> = series
            .iter()
            .filter(|m| m.center.is_some())
            .map(|m| m.prominence)
            .collect();
        if let Ok(threshold) = percentile(&pool, self.config.faint_percentile) {
            for m in series.iter_mut() {
                if m.center.is_some() && m.prominence < threshold {
                    m.center = None;
                }
            }
        }
        series
    }

    /// Interpolate faint windows, fit the trace polynomial with one
    /// shift-tolerance rejection pass, and expand to per-column arrays.
    fn fit_trace(
        &self,
        frame: &Frame,
        series: &[WindowMeasure],
        n_rows: usize,
        n_disp: usize,
    ) -> Result<Trace, TraceError> {
        let known_x: Vec<f64> = series
            .iter()
            .filter(|m| m.center.is_some())
            .map(|m| m.x)
            .collect();
        let known_c: Vec<f64> = series
            .iter()
            .filter_map(|m| m.center)
            .collect();

        let mut xs = Vec::with_capacity(series.len());
        let mut centers = Vec::with_capacity(series.len());
        let mut weights = Vec::with_capacity(series.len());
        for m in series {
            let center = match m.center {
                Some(c) => c,
                // Clamped interpolation keeps end windows at the nearest
                // measured center instead of extrapolating.
                None => match interp_clamped(m.x, &known_x, &known_c) {
                    Ok(c) => c,
                    Err(_) => continue,
                },
            };
            xs.push(m.x);
            centers.push(center);
            weights.push(if m.center.is_some() { 1.0 } else { 0.0 });
        }

        let poly = polyfit(&xs, &centers, self.config.fit_degree)?;
        let poly = self.reject_and_refit(&poly, &xs, &centers);

        let n_confident = weights.iter().filter(|&&w| w > 0.0).count();
        debug!(
            "trace fit over {} windows ({} confident), rms {:.2} px",
            xs.len(),
            n_confident,
            poly.rms_residual(&xs, &centers)
        );

        let fallback_fwhm = global_fwhm(frame, &poly);
        let mut out_centers = Vec::with_capacity(n_disp);
        let mut out_fwhm = Vec::with_capacity(n_disp);
        let mut out_conf = Vec::with_capacity(n_disp);
        for col in 0..n_disp {
            let x = col as f64;
            let center = poly.eval(x).clamp(0.0, (n_rows - 1) as f64);
            out_centers.push(center);
            out_fwhm.push(column_fwhm(frame, col, center, self.config.trace_width, fallback_fwhm));
            out_conf.push(interp_clamped(x, &xs, &weights).unwrap_or(0.0).clamp(0.0, 1.0));
        }

        Ok(Trace {
            centers: out_centers,
            fwhm: out_fwhm,
            confidence: out_conf,
        })
    }

    /// Drop windows whose residual exceeds the shift tolerance and refit.
    /// Falls back to the original fit if rejection starves the refit.
    fn reject_and_refit(&self, poly: &Polynomial, xs: &[f64], centers: &[f64]) -> Polynomial {
        let mut kept_x = Vec::with_capacity(xs.len());
        let mut kept_c = Vec::with_capacity(xs.len());
        for (&x, &c) in xs.iter().zip(centers) {
            if (c - poly.eval(x)).abs() <= self.config.shift_tolerance {
                kept_x.push(x);
                kept_c.push(c);
            }
        }
        if kept_x.len() == xs.len() {
            return poly.clone();
        }
        debug!("trace refit rejects {} windows", xs.len() - kept_x.len());
        match polyfit(&kept_x, &kept_c, self.config.fit_degree) {
            Ok(refit) => refit,
            Err(err) => {
                warn!("trace refit failed ({err}); keeping the first fit");
                poly.clone()
            }
        }
    }
}

/// Collapse columns `[lo, hi)` into a spatial profile, skipping masked
/// pixels.
fn collapse(frame: &Frame, lo: usize, hi: usize) -> Vec<f64> {
    let image = frame.image();
    let mut profile = vec![0.0; frame.n_spatial()];
    for col in lo..hi {
        for (row, acc) in profile.iter_mut().enumerate() {
            if !frame.is_masked(row, col) {
                *acc += image[[row, col]];
            }
        }
    }
    profile
}

/// FWHM of one column's cross-section around `center`, or `fallback` when
/// the moments are degenerate.
fn column_fwhm(frame: &Frame, col: usize, center: f64, half_width: f64, fallback: f64) -> f64 {
    let n_rows = frame.n_spatial();
    let lo = (center - half_width).floor().max(0.0) as usize;
    let hi = (((center + half_width).ceil() as usize) + 1).min(n_rows);

    let mut xs = Vec::with_capacity(hi - lo);
    let mut ys = Vec::with_capacity(hi - lo);
    for row in lo..hi {
        if !frame.is_masked(row, col) {
            xs.push(row as f64);
            ys.push(frame.image()[[row, col]]);
        }
    }
    if ys.len() < 3 {
        return fallback;
    }
    let baseline = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let net: Vec<f64> = ys.iter().map(|v| v - baseline).collect();
    fit_moments(&xs, &net)
        .map(|g| g.fwhm())
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(fallback)
}

/// Representative FWHM from the full-frame collapse along the fitted trace.
fn global_fwhm(frame: &Frame, poly: &Polynomial) -> f64 {
    let center = poly.eval(frame.n_dispersion() as f64 / 2.0);
    let profile = collapse(frame, 0, frame.n_dispersion());
    let half_width = 25.0;
    let lo = (center - half_width).floor().max(0.0) as usize;
    let hi = (((center + half_width).ceil() as usize) + 1).min(profile.len());
    if hi <= lo + 2 {
        return DEFAULT_SIGMA * FWHM_PER_SIGMA;
    }
    let xs: Vec<f64> = (lo..hi).map(|r| r as f64).collect();
    let baseline = profile[lo..hi].iter().copied().fold(f64::INFINITY, f64::min);
    let net: Vec<f64> = profile[lo..hi].iter().map(|v| v - baseline).collect();
    fit_moments(&xs, &net)
        .map(|g| g.fwhm())
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(DEFAULT_SIGMA * FWHM_PER_SIGMA)
}
