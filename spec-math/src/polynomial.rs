//! Least-squares polynomial fitting and evaluation.
//!
//! Fits are solved through a column-equilibrated Vandermonde design matrix
//! and SVD, which keeps coefficients in raw (unscaled) x so callers can
//! report them directly. Weighted fits scale each row by the square root of
//! its weight; zero-weight points are legal and simply drop out.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Relative singular-value cutoff for the SVD solve.
const SVD_EPSILON: f64 = 1e-12;

/// Errors that can occur when fitting a polynomial to data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Fewer usable points than coefficients being solved for.
    #[error("need at least {needed} points for a degree {degree} fit, got {got}")]
    TooFewPoints {
        needed: usize,
        degree: usize,
        got: usize,
    },
    /// Input slices disagree in length.
    #[error("mismatched input lengths: {x_len} x values vs {y_len} y values")]
    MismatchedLengths { x_len: usize, y_len: usize },
    /// A NaN or infinite value was found in the inputs.
    #[error("non-finite value in fit input")]
    NonFinite,
    /// The design matrix has no solution (e.g. all x identical).
    #[error("design matrix is singular or ill-conditioned")]
    Singular,
    /// A weight was negative.
    #[error("negative weight {0} in weighted fit")]
    NegativeWeight(f64),
}

/// A dense polynomial with coefficients in ascending powers of x.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coeffs: Vec<f64>,
}

impl Polynomial {
    /// Create a polynomial from ascending-power coefficients.
    ///
    /// Panics if `coeffs` is empty; a polynomial always has at least a
    /// constant term.
    pub fn new(coeffs: Vec<f64>) -> Self {
        assert!(
            !coeffs.is_empty(),
            "Polynomial requires at least one coefficient"
        );
        Self { coeffs }
    }

    /// Coefficients in ascending powers of x.
    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    /// Degree of the polynomial (number of coefficients minus one).
    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    /// Evaluate at `x` using Horner's scheme.
    pub fn eval(&self, x: f64) -> f64 {
        let mut acc = 0.0;
        for &c in self.coeffs.iter().rev() {
            acc = acc * x + c;
        }
        acc
    }

    /// Evaluate at every point of `xs`.
    pub fn eval_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.eval(x)).collect()
    }

    /// First derivative as a new polynomial.
    pub fn derivative(&self) -> Polynomial {
        if self.coeffs.len() == 1 {
            return Polynomial::new(vec![0.0]);
        }
        let coeffs = self
            .coeffs
            .iter()
            .enumerate()
            .skip(1)
            .map(|(k, &c)| k as f64 * c)
            .collect();
        Polynomial::new(coeffs)
    }

    /// True if the polynomial is strictly monotonic over `[lo, hi]`,
    /// checked by sampling the derivative at `samples` evenly spaced points.
    pub fn is_monotonic_over(&self, lo: f64, hi: f64, samples: usize) -> bool {
        assert!(samples >= 2, "monotonicity check needs at least 2 samples");
        let deriv = self.derivative();
        let step = (hi - lo) / (samples - 1) as f64;
        let first = deriv.eval(lo);
        if first == 0.0 {
            return false;
        }
        let sign = first.signum();
        (1..samples).all(|i| {
            let d = deriv.eval(lo + step * i as f64);
            d != 0.0 && d.signum() == sign
        })
    }

    /// Root-mean-square residual of the polynomial against `(x, y)` samples.
    pub fn rms_residual(&self, x: &[f64], y: &[f64]) -> f64 {
        assert_eq!(x.len(), y.len(), "residual inputs must match in length");
        if x.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| {
                let r = yi - self.eval(xi);
                r * r
            })
            .sum();
        (sum_sq / x.len() as f64).sqrt()
    }
}

/// Fit a polynomial of the given degree by unweighted least squares.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Polynomial, FitError> {
    let w = vec![1.0; x.len()];
    polyfit_weighted(x, y, &w, degree)
}

/// Fit a polynomial of the given degree by weighted least squares.
///
/// Each point contributes with weight `w[i]` (inverse-variance weighting in
/// most callers). Points with `w[i] == 0` are ignored for the purposes of
/// the minimum-point count.
///
/// # Arguments
/// * `x` - Abscissae
/// * `y` - Ordinates, same length as `x`
/// * `w` - Non-negative weights, same length as `x`
/// * `degree` - Polynomial degree to solve for
///
/// # Returns
/// * `Ok(Polynomial)` - The least-squares solution in raw x
/// * `Err(FitError)` - Validation or rank failure
pub fn polyfit_weighted(
    x: &[f64],
    y: &[f64],
    w: &[f64],
    degree: usize,
) -> Result<Polynomial, FitError> {
    if x.len() != y.len() || x.len() != w.len() {
        return Err(FitError::MismatchedLengths {
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    for &wi in w {
        if wi < 0.0 {
            return Err(FitError::NegativeWeight(wi));
        }
    }
    if x.iter().chain(y).chain(w).any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite);
    }

    let n_coeff = degree + 1;
    let usable = w.iter().filter(|&&wi| wi > 0.0).count();
    if usable < n_coeff {
        return Err(FitError::TooFewPoints {
            needed: n_coeff,
            degree,
            got: usable,
        });
    }

    // Row-weighted Vandermonde design matrix.
    let n = x.len();
    let mut design = DMatrix::zeros(n, n_coeff);
    let mut rhs = DVector::zeros(n);
    for i in 0..n {
        let sqrt_w = w[i].sqrt();
        let mut power = 1.0;
        for j in 0..n_coeff {
            design[(i, j)] = power * sqrt_w;
            power *= x[i];
        }
        rhs[i] = y[i] * sqrt_w;
    }

    // Equilibrate columns so high powers of large x do not swamp the SVD.
    let mut col_norms = vec![0.0; n_coeff];
    for j in 0..n_coeff {
        let norm = design.column(j).norm();
        if norm == 0.0 || !norm.is_finite() {
            return Err(FitError::Singular);
        }
        col_norms[j] = norm;
        for i in 0..n {
            design[(i, j)] /= norm;
        }
    }

    let svd = design.svd(true, true);
    // A rank-deficient system still yields a minimum-norm solution from the
    // SVD, so the rank has to be checked explicitly.
    if svd.rank(SVD_EPSILON) < n_coeff {
        return Err(FitError::Singular);
    }
    let scaled = svd
        .solve(&rhs, SVD_EPSILON)
        .map_err(|_| FitError::Singular)?;

    let coeffs: Vec<f64> = scaled
        .iter()
        .zip(&col_norms)
        .map(|(c, norm)| c / norm)
        .collect();
    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err(FitError::Singular);
    }
    Ok(Polynomial::new(coeffs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_eval_horner_matches_direct() {
        let p = Polynomial::new(vec![2.0, -1.0, 0.5]);
        let x = 3.0;
        let direct = 2.0 - 1.0 * x + 0.5 * x * x;
        assert_relative_eq!(p.eval(x), direct, epsilon = 1e-12);
    }

    #[test]
    fn test_fit_recovers_exact_cubic() {
        let truth = Polynomial::new(vec![5.0, -2.0, 0.3, 0.01]);
        let x: Vec<f64> = (0..50).map(|i| i as f64 * 4.0).collect();
        let y = truth.eval_many(&x);

        let fitted = polyfit(&x, &y, 3).unwrap();
        for (a, b) in fitted.coeffs().iter().zip(truth.coeffs()) {
            assert_relative_eq!(a, b, epsilon = 1e-6, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_fit_high_degree_large_x_is_stable() {
        // Degree-7 fit over a detector-sized axis; raw Vandermonde entries
        // reach 1024^7 so this only passes with column equilibration.
        let truth = Polynomial::new(vec![3800.0, 4.3, 1e-4, -2e-8, 1e-12, 0.0, 0.0, 0.0]);
        let x: Vec<f64> = (0..1024).map(|i| i as f64).collect();
        let y = truth.eval_many(&x);

        let fitted = polyfit(&x, &y, 7).unwrap();
        for (&xi, &yi) in x.iter().zip(&y) {
            assert_relative_eq!(fitted.eval(xi), yi, epsilon = 1e-2, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_weighted_fit_ignores_zero_weight_outlier() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let mut y: Vec<f64> = x.iter().map(|&xi| 1.0 + 2.0 * xi).collect();
        y[2] = 1e6; // wild outlier
        let w = vec![1.0, 1.0, 0.0, 1.0, 1.0];

        let fitted = polyfit_weighted(&x, &y, &w, 1).unwrap();
        assert_relative_eq!(fitted.coeffs()[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(fitted.coeffs()[1], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_too_few_points_rejected() {
        let x = vec![1.0, 2.0];
        let y = vec![1.0, 2.0];
        let err = polyfit(&x, &y, 3).unwrap_err();
        assert_eq!(
            err,
            FitError::TooFewPoints {
                needed: 4,
                degree: 3,
                got: 2
            }
        );
    }

    #[test]
    fn test_identical_x_is_singular() {
        let x = vec![2.0; 6];
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert!(matches!(polyfit(&x, &y, 2), Err(FitError::Singular)));
    }

    #[test]
    fn test_nan_input_rejected() {
        let x = vec![0.0, 1.0, f64::NAN, 3.0];
        let y = vec![0.0, 1.0, 2.0, 3.0];
        assert_eq!(polyfit(&x, &y, 1).unwrap_err(), FitError::NonFinite);
    }

    #[test]
    fn test_derivative_coefficients() {
        let p = Polynomial::new(vec![1.0, 2.0, 3.0, 4.0]);
        let d = p.derivative();
        assert_eq!(d.coeffs(), &[2.0, 6.0, 12.0]);
    }

    #[test]
    fn test_monotonicity_check() {
        let rising = Polynomial::new(vec![3800.0, 4.3, 1e-5]);
        assert!(rising.is_monotonic_over(0.0, 1024.0, 64));

        let parabola = Polynomial::new(vec![0.0, -10.0, 1.0]);
        assert!(!parabola.is_monotonic_over(0.0, 20.0, 64));
    }

    #[test]
    fn test_rms_residual_zero_for_exact_fit() {
        let p = Polynomial::new(vec![1.0, 1.0]);
        let x = vec![0.0, 1.0, 2.0];
        let y = vec![1.0, 2.0, 3.0];
        assert_relative_eq!(p.rms_residual(&x, &y), 0.0, epsilon = 1e-12);
    }
}
