//! Atmospheric extinction at the supported observing sites.
//!
//! Each site carries a tabulated magnitudes-per-airmass curve over
//! 3000-10000 angstrom, dominated by Rayleigh scattering and ozone in the
//! blue and aerosols in the red. Curves are interpolated linearly between
//! knots and clamped at the table edges.

use super::FluxError;
use once_cell::sync::Lazy;
use std::fmt;
use std::str::FromStr;

/// Observing sites with built-in extinction curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Site {
    /// Roque de los Muchachos, La Palma, 2420 m
    RoqueDeLosMuchachos,
    /// Mauna Kea, Hawaii, 4205 m
    MaunaKea,
    /// Cerro Paranal, Chile, 2635 m
    CerroParanal,
    /// La Silla, Chile, 2400 m
    LaSilla,
}

impl Site {
    /// Short tag used in frame metadata.
    pub fn tag(&self) -> &'static str {
        match self {
            Site::RoqueDeLosMuchachos => "orm",
            Site::MaunaKea => "mk",
            Site::CerroParanal => "cp",
            Site::LaSilla => "ls",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Site {
    type Err = FluxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orm" => Ok(Site::RoqueDeLosMuchachos),
            "mk" => Ok(Site::MaunaKea),
            "cp" => Ok(Site::CerroParanal),
            "ls" => Ok(Site::LaSilla),
            _ => Err(FluxError::UnknownSite {
                name: s.to_string(),
            }),
        }
    }
}

/// Wavelength knots shared by all site tables, angstrom.
const KNOTS: [f64; 17] = [
    3000.0, 3250.0, 3500.0, 3750.0, 4000.0, 4500.0, 5000.0, 5500.0, 6000.0, 6500.0, 7000.0,
    7500.0, 8000.0, 8500.0, 9000.0, 9500.0, 10000.0,
];

const ORM_MAG: [f64; 17] = [
    1.78, 1.21, 0.88, 0.64, 0.48, 0.31, 0.21, 0.15, 0.115, 0.090, 0.072, 0.060, 0.051, 0.044,
    0.039, 0.035, 0.032,
];

const MK_MAG: [f64; 17] = [
    1.52, 1.02, 0.72, 0.52, 0.39, 0.25, 0.17, 0.12, 0.092, 0.072, 0.056, 0.046, 0.039, 0.033,
    0.029, 0.026, 0.024,
];

const CP_MAG: [f64; 17] = [
    1.71, 1.16, 0.84, 0.61, 0.45, 0.29, 0.20, 0.14, 0.108, 0.085, 0.067, 0.056, 0.047, 0.041,
    0.036, 0.032, 0.029,
];

const LS_MAG: [f64; 17] = [
    1.80, 1.23, 0.90, 0.66, 0.49, 0.32, 0.215, 0.155, 0.118, 0.092, 0.074, 0.062, 0.052, 0.045,
    0.040, 0.036, 0.033,
];

struct SiteCurves {
    orm: ExtinctionCurve,
    mk: ExtinctionCurve,
    cp: ExtinctionCurve,
    ls: ExtinctionCurve,
}

static CURVES: Lazy<SiteCurves> = Lazy::new(|| SiteCurves {
    orm: ExtinctionCurve::from_table(Site::RoqueDeLosMuchachos, &ORM_MAG),
    mk: ExtinctionCurve::from_table(Site::MaunaKea, &MK_MAG),
    cp: ExtinctionCurve::from_table(Site::CerroParanal, &CP_MAG),
    ls: ExtinctionCurve::from_table(Site::LaSilla, &LS_MAG),
});

/// Per-site extinction curve in magnitudes per unit airmass.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtinctionCurve {
    site: Site,
    wavelength: Vec<f64>,
    mag_per_airmass: Vec<f64>,
}

impl ExtinctionCurve {
    fn from_table(site: Site, mag: &[f64; 17]) -> Self {
        assert!(
            KNOTS.windows(2).all(|w| w[0] < w[1]),
            "extinction knots must increase"
        );
        Self {
            site,
            wavelength: KNOTS.to_vec(),
            mag_per_airmass: mag.to_vec(),
        }
    }

    /// The built-in curve for a site.
    pub fn for_site(site: Site) -> &'static ExtinctionCurve {
        match site {
            Site::RoqueDeLosMuchachos => &CURVES.orm,
            Site::MaunaKea => &CURVES.mk,
            Site::CerroParanal => &CURVES.cp,
            Site::LaSilla => &CURVES.ls,
        }
    }

    pub fn site(&self) -> Site {
        self.site
    }

    /// Extinction at a wavelength, magnitudes per unit airmass.
    pub fn extinction(&self, wavelength: f64) -> f64 {
        super::eval_table(wavelength, &self.wavelength, &self.mag_per_airmass)
    }

    /// Multiplicative de-reddening factor `10^(0.4 A(lambda) airmass)`.
    pub fn correction_factor(&self, wavelength: f64, airmass: f64) -> f64 {
        10f64.powf(0.4 * self.extinction(wavelength) * airmass)
    }
}
