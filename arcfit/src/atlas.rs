//! Arc-lamp line catalogs.
//!
//! A catalog is the list of laboratory wavelengths the calibrator is allowed
//! to match detected peaks against. A built-in xenon atlas covering the
//! visible range is provided; instrument-specific catalogs are built with
//! [`ArcLineCatalog::from_lines`].

use crate::refraction::{vacuum_to_air, ObservingConditions};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// A single laboratory reference line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcLine {
    /// Laboratory wavelength in Angstrom
    pub wavelength: f64,
    /// Emitting species, e.g. "Xe"
    pub species: String,
}

/// Xenon lamp lines in the visible/near-infrared, Angstrom.
const XENON_LINES: [f64; 34] = [
    4193.5, 4385.77, 4500.98, 4524.68, 4582.75, 4624.28, 4671.23, 4697.02, 4734.15, 4807.02,
    4921.48, 5028.28, 5618.88, 5823.89, 5893.29, 5934.17, 6182.42, 6318.06, 6472.841, 6595.56,
    6668.92, 6728.01, 6827.32, 6976.18, 7119.60, 7257.9, 7393.8, 7584.68, 7642.02, 7740.31,
    7802.65, 7887.40, 7967.34, 8057.258,
];

static XENON: Lazy<ArcLineCatalog> = Lazy::new(|| {
    ArcLineCatalog::from_lines(
        XENON_LINES
            .iter()
            .map(|&w| ArcLine {
                wavelength: w,
                species: "Xe".to_string(),
            })
            .collect(),
    )
});

/// An ordered set of reference lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcLineCatalog {
    lines: Vec<ArcLine>,
}

impl ArcLineCatalog {
    /// Build a catalog from arbitrary lines. Lines are sorted by wavelength;
    /// non-finite or non-positive wavelengths are dropped.
    pub fn from_lines(lines: Vec<ArcLine>) -> Self {
        let mut lines: Vec<ArcLine> = lines
            .into_iter()
            .filter(|l| l.wavelength.is_finite() && l.wavelength > 0.0)
            .collect();
        lines.sort_by(|a, b| a.wavelength.partial_cmp(&b.wavelength).unwrap());
        Self { lines }
    }

    /// Convenience constructor from bare wavelengths with one species label.
    pub fn from_wavelengths(wavelengths: &[f64], species: &str) -> Self {
        Self::from_lines(
            wavelengths
                .iter()
                .map(|&w| ArcLine {
                    wavelength: w,
                    species: species.to_string(),
                })
                .collect(),
        )
    }

    /// The built-in xenon lamp catalog.
    pub fn xenon() -> &'static ArcLineCatalog {
        &XENON
    }

    /// All lines, ascending in wavelength.
    pub fn lines(&self) -> &[ArcLine] {
        &self.lines
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when the catalog holds no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Bare wavelengths, ascending.
    pub fn wavelengths(&self) -> Vec<f64> {
        self.lines.iter().map(|l| l.wavelength).collect()
    }

    /// A new catalog restricted to `[lo, hi]` Angstrom.
    pub fn restricted(&self, lo: f64, hi: f64) -> ArcLineCatalog {
        ArcLineCatalog {
            lines: self
                .lines
                .iter()
                .filter(|l| l.wavelength >= lo && l.wavelength <= hi)
                .cloned()
                .collect(),
        }
    }

    /// A new catalog with every vacuum wavelength converted to its in-air
    /// value for the given conditions.
    pub fn to_air(&self, conditions: &ObservingConditions) -> ArcLineCatalog {
        ArcLineCatalog {
            lines: self
                .lines
                .iter()
                .map(|l| ArcLine {
                    wavelength: vacuum_to_air(l.wavelength, conditions),
                    species: l.species.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xenon_atlas_sorted_and_sized() {
        let xe = ArcLineCatalog::xenon();
        assert_eq!(xe.len(), 34);
        let waves = xe.wavelengths();
        assert!(waves.windows(2).all(|w| w[0] < w[1]));
        assert!(waves[0] >= 4000.0 && *waves.last().unwrap() <= 8200.0);
    }

    #[test]
    fn test_from_lines_sorts_and_filters() {
        let cat = ArcLineCatalog::from_lines(vec![
            ArcLine {
                wavelength: 6000.0,
                species: "Ne".into(),
            },
            ArcLine {
                wavelength: f64::NAN,
                species: "Ne".into(),
            },
            ArcLine {
                wavelength: 4000.0,
                species: "Ne".into(),
            },
        ]);
        assert_eq!(cat.wavelengths(), vec![4000.0, 6000.0]);
    }

    #[test]
    fn test_restricted_window() {
        let xe = ArcLineCatalog::xenon().restricted(5000.0, 6000.0);
        assert!(xe
            .wavelengths()
            .iter()
            .all(|&w| (5000.0..=6000.0).contains(&w)));
        assert!(!xe.is_empty());
    }

    #[test]
    fn test_to_air_shifts_blueward() {
        let cond = ObservingConditions::default();
        let vac = ArcLineCatalog::from_wavelengths(&[5000.0, 7000.0], "Xe");
        let air = vac.to_air(&cond);
        for (v, a) in vac.lines().iter().zip(air.lines()) {
            assert!(a.wavelength < v.wavelength);
            assert!(v.wavelength - a.wavelength < 3.0);
        }
    }
}
