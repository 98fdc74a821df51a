//! 1-D Gaussian profile helpers.
//!
//! Spatial cross-sections of a spectral trace are close to Gaussian, so the
//! tracer and the extraction profile models describe them with this type.
//! `pixel_value` integrates the profile across a whole pixel, which is the
//! correct way to render a profile onto a detector grid and what makes
//! aperture sums exactly comparable to the analytic integral.

use scilib::math::basic::erf;
use std::f64::consts::{PI, SQRT_2};

/// FWHM of a Gaussian in units of its sigma: 2 sqrt(2 ln 2).
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// An amplitude-parameterized 1-D Gaussian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianProfile {
    /// Peak height of the profile
    pub amplitude: f64,
    /// Center position in pixels
    pub center: f64,
    /// Standard deviation in pixels
    pub sigma: f64,
}

impl GaussianProfile {
    /// Create a profile. Panics on non-positive sigma; a degenerate width is
    /// a programming error, not a data condition.
    pub fn new(amplitude: f64, center: f64, sigma: f64) -> Self {
        assert!(sigma > 0.0, "Gaussian sigma must be positive, got {sigma}");
        Self {
            amplitude,
            center,
            sigma,
        }
    }

    /// Profile value at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        let z = (x - self.center) / self.sigma;
        self.amplitude * (-0.5 * z * z).exp()
    }

    /// Full width at half maximum.
    pub fn fwhm(&self) -> f64 {
        FWHM_PER_SIGMA * self.sigma
    }

    /// Total area under the profile.
    pub fn total_flux(&self) -> f64 {
        self.amplitude * self.sigma * (2.0 * PI).sqrt()
    }

    /// Analytic integral of the profile over `[lo, hi]`.
    pub fn integral(&self, lo: f64, hi: f64) -> f64 {
        let scale = self.amplitude * self.sigma * (PI / 2.0).sqrt();
        let zhi = (hi - self.center) / (self.sigma * SQRT_2);
        let zlo = (lo - self.center) / (self.sigma * SQRT_2);
        scale * (erf(zhi) - erf(zlo))
    }

    /// Profile flux falling into the pixel centered at integer-aligned `x`,
    /// i.e. the integral over `[x - 0.5, x + 0.5]`.
    pub fn pixel_value(&self, x: f64) -> f64 {
        self.integral(x - 0.5, x + 0.5)
    }
}

/// Moment-based Gaussian fit to a sampled cross-section.
///
/// Negative samples (background-subtraction noise) are clamped to zero
/// before the moment sums. Returns None when there is no positive flux or
/// the second moment collapses, mirroring the zero-flux early return of the
/// image centroid path.
///
/// # Arguments
/// * `xs` - Sample positions
/// * `ys` - Sample values, same length as `xs`
pub fn fit_moments(xs: &[f64], ys: &[f64]) -> Option<GaussianProfile> {
    assert_eq!(xs.len(), ys.len(), "moment fit inputs must match in length");

    let mut m0 = 0.0;
    let mut m1 = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        let v = y.max(0.0);
        m0 += v;
        m1 += v * x;
    }
    if m0 <= 0.0 {
        return None;
    }
    let center = m1 / m0;

    let mut m2 = 0.0;
    let mut peak = 0.0_f64;
    for (&x, &y) in xs.iter().zip(ys) {
        let v = y.max(0.0);
        m2 += v * (x - center) * (x - center);
        peak = peak.max(v);
    }
    let variance = m2 / m0;
    if variance <= 0.0 {
        return None;
    }

    Some(GaussianProfile {
        amplitude: peak,
        center,
        sigma: variance.sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_eval_peak_and_falloff() {
        let g = GaussianProfile::new(3.0, 10.0, 2.0);
        assert_relative_eq!(g.eval(10.0), 3.0);
        assert_relative_eq!(g.eval(12.0), 3.0 * (-0.5_f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_fwhm_matches_half_maximum() {
        let g = GaussianProfile::new(1.0, 0.0, 3.0);
        let half_width = g.fwhm() / 2.0;
        assert_relative_eq!(g.eval(half_width), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_integral_full_range_is_total_flux() {
        let g = GaussianProfile::new(2.5, 50.0, 4.0);
        assert_relative_eq!(
            g.integral(-1000.0, 1000.0),
            g.total_flux(),
            max_relative = 1e-10
        );
    }

    #[test]
    fn test_pixel_values_sum_to_window_integral() {
        let g = GaussianProfile::new(100.0, 20.0, 2.5);
        let summed: f64 = (10..=30).map(|x| g.pixel_value(x as f64)).sum();
        assert_relative_eq!(summed, g.integral(9.5, 30.5), max_relative = 1e-12);
    }

    #[test]
    fn test_moment_fit_recovers_center_and_width() {
        let truth = GaussianProfile::new(50.0, 31.7, 2.2);
        let xs: Vec<f64> = (0..64).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| truth.eval(x)).collect();

        let fit = fit_moments(&xs, &ys).unwrap();
        assert_relative_eq!(fit.center, truth.center, epsilon = 1e-6);
        assert_relative_eq!(fit.sigma, truth.sigma, epsilon = 1e-2);
        assert_relative_eq!(fit.amplitude, truth.eval(32.0), epsilon = 1e-9);
    }

    #[test]
    fn test_moment_fit_empty_flux_is_none() {
        let xs = vec![0.0, 1.0, 2.0];
        let ys = vec![-1.0, -0.5, 0.0];
        assert!(fit_moments(&xs, &ys).is_none());
    }
}
