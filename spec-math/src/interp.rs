//! Linear interpolation over tabulated curves.
//!
//! Used for extinction tables, literature spectra and sensitivity curves,
//! all of which are modest tables queried many times, so lookup is a binary
//! search rather than a linear scan.

use thiserror::Error;

/// Errors that can occur during interpolation operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("value {0} is out of bounds for interpolation range [{1}, {2}]")]
    OutOfBounds(f64, f64, f64),
    #[error("input tables must have at least 2 points")]
    InsufficientData,
    #[error("input tables must have the same length")]
    MismatchedLengths,
    #[error("x values must be sorted in ascending order")]
    UnsortedData,
}

fn validate(xs: &[f64], ys: &[f64]) -> Result<(), InterpError> {
    if xs.len() != ys.len() {
        return Err(InterpError::MismatchedLengths);
    }
    if xs.len() < 2 {
        return Err(InterpError::InsufficientData);
    }
    for i in 1..xs.len() {
        if xs[i] < xs[i - 1] {
            return Err(InterpError::UnsortedData);
        }
    }
    Ok(())
}

/// Interpolate between the two bracketing knots, assuming validated input
/// and an in-range x.
fn interp_unchecked(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let idx = xs.partition_point(|&val| val <= x);
    if idx == 0 {
        return ys[0];
    }
    if idx == xs.len() {
        return ys[xs.len() - 1];
    }
    let (x1, x2) = (xs[idx - 1], xs[idx]);
    let (y1, y2) = (ys[idx - 1], ys[idx]);
    if x2 == x1 {
        return y1;
    }
    let t = (x - x1) / (x2 - x1);
    y1 + t * (y2 - y1)
}

/// Linear interpolation with strict domain checking.
///
/// # Arguments
/// * `x` - The x-coordinate at which to interpolate
/// * `xs` - Knot x-coordinates, sorted ascending
/// * `ys` - Knot y-values, same length as `xs`
///
/// # Returns
/// * `Ok(f64)` - Interpolated value
/// * `Err(InterpError)` - Validation failure or x outside `[xs[0], xs[n-1]]`
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, InterpError> {
    validate(xs, ys)?;
    if x < xs[0] || x > xs[xs.len() - 1] {
        return Err(InterpError::OutOfBounds(x, xs[0], xs[xs.len() - 1]));
    }
    Ok(interp_unchecked(x, xs, ys))
}

/// Linear interpolation that clamps out-of-range queries to the edge values
/// instead of failing. Validation errors are still reported.
pub fn interp_clamped(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, InterpError> {
    validate(xs, ys)?;
    if x <= xs[0] {
        return Ok(ys[0]);
    }
    if x >= xs[xs.len() - 1] {
        return Ok(ys[ys.len() - 1]);
    }
    Ok(interp_unchecked(x, xs, ys))
}

/// Resample a tabulated curve onto a new grid of x positions.
///
/// Every target position must fall inside the source table's range.
pub fn resample(x_new: &[f64], xs: &[f64], ys: &[f64]) -> Result<Vec<f64>, InterpError> {
    validate(xs, ys)?;
    let (lo, hi) = (xs[0], xs[xs.len() - 1]);
    x_new
        .iter()
        .map(|&x| {
            if x < lo || x > hi {
                Err(InterpError::OutOfBounds(x, lo, hi))
            } else {
                Ok(interp_unchecked(x, xs, ys))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_interp_midpoint() {
        let xs = vec![0.0, 1.0, 2.0, 3.0];
        let ys = vec![0.0, 2.0, 4.0, 6.0];
        assert_relative_eq!(interp(1.5, &xs, &ys).unwrap(), 3.0);
    }

    #[test]
    fn test_interp_at_knots() {
        let xs = vec![0.0, 1.0, 4.0];
        let ys = vec![10.0, 20.0, -5.0];
        assert_relative_eq!(interp(0.0, &xs, &ys).unwrap(), 10.0);
        assert_relative_eq!(interp(1.0, &xs, &ys).unwrap(), 20.0);
        assert_relative_eq!(interp(4.0, &xs, &ys).unwrap(), -5.0);
    }

    #[test]
    fn test_interp_out_of_bounds() {
        let xs = vec![0.0, 1.0];
        let ys = vec![0.0, 1.0];
        assert!(matches!(
            interp(-0.1, &xs, &ys),
            Err(InterpError::OutOfBounds(_, _, _))
        ));
        assert!(matches!(
            interp(1.1, &xs, &ys),
            Err(InterpError::OutOfBounds(_, _, _))
        ));
    }

    #[test]
    fn test_interp_clamped_edges() {
        let xs = vec![3000.0, 10000.0];
        let ys = vec![1.0, 0.1];
        assert_relative_eq!(interp_clamped(2000.0, &xs, &ys).unwrap(), 1.0);
        assert_relative_eq!(interp_clamped(12000.0, &xs, &ys).unwrap(), 0.1);
    }

    #[test]
    fn test_unsorted_rejected() {
        let xs = vec![0.0, 2.0, 1.0];
        let ys = vec![0.0, 1.0, 2.0];
        assert_eq!(interp(0.5, &xs, &ys).unwrap_err(), InterpError::UnsortedData);
    }

    #[test]
    fn test_mismatched_rejected() {
        let xs = vec![0.0, 1.0, 2.0];
        let ys = vec![0.0, 1.0];
        assert_eq!(
            interp(0.5, &xs, &ys).unwrap_err(),
            InterpError::MismatchedLengths
        );
    }

    #[test]
    fn test_resample_linear_curve() {
        let xs: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| 3.0 * x + 1.0).collect();
        let grid = vec![0.5, 2.25, 9.75];
        let out = resample(&grid, &xs, &ys).unwrap();
        for (&g, &o) in grid.iter().zip(&out) {
            assert_relative_eq!(o, 3.0 * g + 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_resample_rejects_outside_point() {
        let xs = vec![0.0, 1.0];
        let ys = vec![0.0, 1.0];
        assert!(resample(&[0.5, 1.5], &xs, &ys).is_err());
    }
}
