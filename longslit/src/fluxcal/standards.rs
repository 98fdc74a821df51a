//! Built-in spectrophotometric standard spectra.
//!
//! Literature fluxes are tabulated in erg / s / cm^2 / angstrom on coarse
//! wavelength grids; continuum points only, line cores excluded.

use super::FluxError;
use once_cell::sync::Lazy;

/// A literature standard-star spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardStar {
    name: &'static str,
    wavelength: Vec<f64>,
    flux: Vec<f64>,
}

impl StandardStar {
    fn from_table(name: &'static str, table: &[(f64, f64)]) -> Self {
        assert!(table.len() >= 2, "standard table needs at least two knots");
        assert!(
            table.windows(2).all(|w| w[0].0 < w[1].0),
            "standard table wavelengths must increase"
        );
        assert!(
            table.iter().all(|&(_, f)| f > 0.0),
            "standard table fluxes must be positive"
        );
        Self {
            name,
            wavelength: table.iter().map(|&(w, _)| w).collect(),
            flux: table.iter().map(|&(_, f)| f).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    /// Wavelength range covered by the table, angstrom.
    pub fn support(&self) -> (f64, f64) {
        (self.wavelength[0], self.wavelength[self.wavelength.len() - 1])
    }

    /// Literature flux interpolated to a wavelength, clamped at the
    /// table edges.
    pub fn flux_at(&self, wavelength: f64) -> f64 {
        super::eval_table(wavelength, &self.wavelength, &self.flux)
    }
}

/// Hiltner 102, reddened B-type standard, 3300-8100 angstrom.
const HILT102: [(f64, f64); 25] = [
    (3300.0, 4.20e-13),
    (3500.0, 3.95e-13),
    (3700.0, 3.70e-13),
    (3900.0, 3.40e-13),
    (4100.0, 3.12e-13),
    (4300.0, 2.86e-13),
    (4500.0, 2.62e-13),
    (4700.0, 2.40e-13),
    (4900.0, 2.20e-13),
    (5100.0, 2.01e-13),
    (5300.0, 1.84e-13),
    (5500.0, 1.68e-13),
    (5700.0, 1.54e-13),
    (5900.0, 1.41e-13),
    (6100.0, 1.29e-13),
    (6300.0, 1.18e-13),
    (6500.0, 1.08e-13),
    (6700.0, 9.9e-14),
    (6900.0, 9.1e-14),
    (7100.0, 8.3e-14),
    (7300.0, 7.6e-14),
    (7500.0, 7.0e-14),
    (7700.0, 6.4e-14),
    (7900.0, 5.9e-14),
    (8100.0, 5.4e-14),
];

/// BD+33 2642, sdO standard, 3300-8100 angstrom.
const BD33: [(f64, f64); 13] = [
    (3300.0, 4.80e-13),
    (3700.0, 4.10e-13),
    (4100.0, 3.40e-13),
    (4500.0, 2.85e-13),
    (4900.0, 2.40e-13),
    (5300.0, 2.00e-13),
    (5700.0, 1.62e-13),
    (6100.0, 1.38e-13),
    (6500.0, 1.18e-13),
    (6900.0, 1.00e-13),
    (7300.0, 8.60e-14),
    (7700.0, 7.40e-14),
    (8100.0, 6.40e-14),
];

/// Feige 110, DO subdwarf standard, 3300-8100 angstrom.
const FEIGE110: [(f64, f64); 13] = [
    (3300.0, 2.10e-13),
    (3700.0, 1.78e-13),
    (4100.0, 1.50e-13),
    (4500.0, 1.27e-13),
    (4900.0, 1.07e-13),
    (5300.0, 9.00e-14),
    (5700.0, 7.60e-14),
    (6100.0, 6.40e-14),
    (6500.0, 5.40e-14),
    (6900.0, 4.60e-14),
    (7300.0, 3.90e-14),
    (7700.0, 3.30e-14),
    (8100.0, 2.80e-14),
];

static LIBRARY: Lazy<Vec<StandardStar>> = Lazy::new(|| {
    vec![
        StandardStar::from_table("hilt102", &HILT102),
        StandardStar::from_table("bd33", &BD33),
        StandardStar::from_table("feige110", &FEIGE110),
    ]
});

/// Look up a standard star by name, case-insensitively.
pub fn standard_star(name: &str) -> Result<&'static StandardStar, FluxError> {
    let lower = name.to_ascii_lowercase();
    LIBRARY
        .iter()
        .find(|star| star.name == lower)
        .ok_or_else(|| FluxError::UnknownStandard {
            name: name.to_string(),
        })
}

/// All built-in standards.
pub fn standard_library() -> &'static [StandardStar] {
    &LIBRARY
}
