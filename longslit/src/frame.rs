//! Detector frame representation.
//!
//! A [`Frame`] owns the 2-D image in electrons, a per-pixel variance derived
//! from the detector noise model at construction, observing metadata, and an
//! optional bad-pixel mask. Arrays are indexed `[spatial row, dispersion
//! column]` and a frame is never mutated after it is built.

use arcfit::ObservingConditions;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Observing and detector metadata attached to a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Ambient temperature, Celsius
    pub temperature_c: f64,
    /// Atmospheric pressure, Pascal
    pub pressure_pa: f64,
    /// Relative humidity, percent
    pub relative_humidity: f64,
    /// Airmass at mid-exposure
    pub airmass: f64,
    /// Exposure time, seconds
    pub exposure_s: f64,
    /// Observing site tag, e.g. "orm"
    pub site: String,
    /// Detector gain, electrons per ADU
    pub gain: f64,
    /// Read noise, electrons RMS
    pub read_noise: f64,
}

impl Default for FrameMeta {
    fn default() -> Self {
        Self {
            temperature_c: 15.0,
            pressure_pa: 101_325.0,
            relative_humidity: 0.0,
            airmass: 1.0,
            exposure_s: 1.0,
            site: "orm".to_string(),
            gain: 1.0,
            read_noise: 0.0,
        }
    }
}

impl FrameMeta {
    /// Atmospheric conditions for refractive-index corrections.
    pub fn conditions(&self) -> ObservingConditions {
        ObservingConditions {
            temperature_c: self.temperature_c,
            pressure_pa: self.pressure_pa,
            relative_humidity: self.relative_humidity,
        }
    }
}

/// A detector image with its noise model and metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Array2<f64>,
    variance: Array2<f64>,
    mask: Option<Array2<bool>>,
    meta: FrameMeta,
}

impl Frame {
    /// Build a frame from raw ADU counts.
    ///
    /// Counts are scaled to electrons by the gain and the variance follows
    /// the CCD noise model `max(signal, 0) + read_noise^2`.
    ///
    /// Panics if the image is empty or the gain is not positive.
    pub fn from_adu(adu: Array2<f64>, meta: FrameMeta) -> Self {
        assert!(meta.gain > 0.0, "gain must be positive, got {}", meta.gain);
        Self::from_electrons(adu.mapv(|v| v * meta.gain), meta)
    }

    /// Build a frame from an image already in electrons.
    pub fn from_electrons(image: Array2<f64>, meta: FrameMeta) -> Self {
        assert!(
            image.nrows() > 0 && image.ncols() > 0,
            "frame must be non-empty, got {:?}",
            image.dim()
        );
        let rn_sq = meta.read_noise * meta.read_noise;
        let variance = image.mapv(|signal| signal.max(0.0) + rn_sq);
        Self {
            image,
            variance,
            mask: None,
            meta,
        }
    }

    /// Attach a bad-pixel mask (`true` = unusable).
    ///
    /// Panics if the mask shape differs from the image shape.
    pub fn with_mask(mut self, mask: Array2<bool>) -> Self {
        assert_eq!(
            mask.dim(),
            self.image.dim(),
            "mask shape must match the image"
        );
        self.mask = Some(mask);
        self
    }

    /// Image in electrons, `[spatial, dispersion]`.
    pub fn image(&self) -> &Array2<f64> {
        &self.image
    }

    /// Per-pixel variance in electrons squared.
    pub fn variance(&self) -> &Array2<f64> {
        &self.variance
    }

    /// Bad-pixel mask, if one was attached.
    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.mask.as_ref()
    }

    /// Observing metadata.
    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    /// Spatial extent (rows).
    pub fn n_spatial(&self) -> usize {
        self.image.nrows()
    }

    /// Dispersion extent (columns).
    pub fn n_dispersion(&self) -> usize {
        self.image.ncols()
    }

    /// True if the pixel is flagged unusable.
    pub fn is_masked(&self, row: usize, col: usize) -> bool {
        self.mask.as_ref().map_or(false, |m| m[[row, col]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_variance_follows_ccd_model() {
        let meta = FrameMeta {
            read_noise: 5.0,
            ..Default::default()
        };
        let image = Array2::from_shape_vec((1, 3), vec![100.0, 0.0, -7.0]).unwrap();
        let frame = Frame::from_electrons(image, meta);

        assert_relative_eq!(frame.variance()[[0, 0]], 125.0);
        assert_relative_eq!(frame.variance()[[0, 1]], 25.0);
        // Negative signal (over-subtracted background) contributes no
        // Poisson term.
        assert_relative_eq!(frame.variance()[[0, 2]], 25.0);
    }

    #[test]
    fn test_adu_scaled_by_gain() {
        let meta = FrameMeta {
            gain: 2.5,
            ..Default::default()
        };
        let frame = Frame::from_adu(Array2::from_elem((2, 2), 10.0), meta);
        assert_relative_eq!(frame.image()[[0, 0]], 25.0);
        assert_relative_eq!(frame.variance()[[1, 1]], 25.0);
    }

    #[test]
    fn test_mask_lookup() {
        let mut mask = Array2::from_elem((2, 3), false);
        mask[[1, 2]] = true;
        let frame = Frame::from_electrons(Array2::zeros((2, 3)), FrameMeta::default())
            .with_mask(mask);

        assert!(frame.is_masked(1, 2));
        assert!(!frame.is_masked(0, 0));
    }

    #[test]
    #[should_panic(expected = "mask shape")]
    fn test_mismatched_mask_panics() {
        let frame = Frame::from_electrons(Array2::zeros((4, 4)), FrameMeta::default());
        let _ = frame.with_mask(Array2::from_elem((4, 5), false));
    }

    #[test]
    fn test_conditions_carry_atmosphere() {
        let meta = FrameMeta {
            temperature_c: 3.0,
            pressure_pa: 77_000.0,
            relative_humidity: 40.0,
            ..Default::default()
        };
        let cond = meta.conditions();
        assert_relative_eq!(cond.temperature_c, 3.0);
        assert_relative_eq!(cond.pressure_pa, 77_000.0);
        assert_relative_eq!(cond.relative_humidity, 40.0);
    }
}
