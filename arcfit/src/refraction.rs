//! Vacuum-to-air wavelength conversion.
//!
//! Laboratory atlas wavelengths are tabulated in vacuum; the detector sees
//! them through air at the dome's temperature, pressure and humidity. The
//! conversion uses the Edlen dispersion formula with the Birch & Downs
//! density correction and a water-vapour term, with saturation vapour
//! pressure from the Bolton approximation. Magnitudes are small (about
//! 1.5 A at 5500 A under standard conditions) but well above the fit RMS a
//! good calibration reaches.

use serde::{Deserialize, Serialize};

/// Ambient conditions at the time of the arc exposure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservingConditions {
    /// Air temperature in degrees Celsius
    pub temperature_c: f64,
    /// Atmospheric pressure in Pascal
    pub pressure_pa: f64,
    /// Relative humidity in percent (0-100)
    pub relative_humidity: f64,
}

impl Default for ObservingConditions {
    fn default() -> Self {
        Self {
            temperature_c: 15.0,
            pressure_pa: 101_325.0,
            relative_humidity: 0.0,
        }
    }
}

/// Saturation water-vapour pressure in Pascal at `temperature_c` (Bolton 1980).
fn saturation_vapour_pressure(temperature_c: f64) -> f64 {
    611.2 * (17.67 * temperature_c / (temperature_c + 243.5)).exp()
}

/// Refractive index of air at the given vacuum wavelength (Angstrom) and
/// conditions.
pub fn refractive_index(wavelength_vacuum: f64, conditions: &ObservingConditions) -> f64 {
    assert!(
        wavelength_vacuum > 0.0,
        "wavelength must be positive, got {wavelength_vacuum}"
    );
    let t = conditions.temperature_c;
    let p = conditions.pressure_pa;

    // Edlen standard-air dispersion; sigma is the wavenumber in inverse micron.
    let sigma2 = (1.0e4 / wavelength_vacuum).powi(2);
    let n_standard =
        1.0 + 1.0e-8 * (8342.54 + 2_406_147.0 / (130.0 - sigma2) + 15_998.0 / (38.9 - sigma2));

    // Birch & Downs density scaling to the actual temperature and pressure.
    let density = p / 96_095.43 * (1.0 + 1.0e-8 * (0.601 - 0.009_72 * t) * p)
        / (1.0 + 0.003_661_0 * t);
    let n_tp = 1.0 + (n_standard - 1.0) * density;

    // Water-vapour correction.
    let vapour = conditions.relative_humidity / 100.0 * saturation_vapour_pressure(t);
    n_tp - 1.0e-10 * vapour * (3.7345 - 0.0401 * sigma2)
}

/// Convert a vacuum wavelength (Angstrom) to its in-air equivalent.
pub fn vacuum_to_air(wavelength_vacuum: f64, conditions: &ObservingConditions) -> f64 {
    wavelength_vacuum / refractive_index(wavelength_vacuum, conditions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_index_near_unity() {
        let n = refractive_index(5500.0, &ObservingConditions::default());
        assert!(n > 1.000_2 && n < 1.000_35, "unphysical index {n}");
    }

    #[test]
    fn test_air_shift_magnitude_at_5500() {
        let air = vacuum_to_air(5500.0, &ObservingConditions::default());
        let shift = 5500.0 - air;
        // Standard conditions shift green light by roughly 1.5 A.
        assert!(
            (1.2..=1.8).contains(&shift),
            "unexpected vacuum-air shift {shift} A"
        );
    }

    #[test]
    fn test_dispersion_blue_shifts_more() {
        let cond = ObservingConditions::default();
        let blue = 4000.0 - vacuum_to_air(4000.0, &cond);
        let red = 8000.0 - vacuum_to_air(8000.0, &cond);
        assert!(
            blue / 4000.0 > red / 8000.0,
            "blue should see a larger fractional shift: {blue} vs {red}"
        );
    }

    #[test]
    fn test_vacuum_limit_at_zero_pressure() {
        let cond = ObservingConditions {
            temperature_c: 15.0,
            pressure_pa: 0.0,
            relative_humidity: 0.0,
        };
        assert_relative_eq!(vacuum_to_air(6000.0, &cond), 6000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_humidity_lowers_index() {
        let dry = ObservingConditions::default();
        let humid = ObservingConditions {
            relative_humidity: 80.0,
            ..dry
        };
        assert!(refractive_index(5500.0, &humid) < refractive_index(5500.0, &dry));
    }

    #[test]
    fn test_saturation_pressure_reference_points() {
        // About 611 Pa at the triple point and 2.3 kPa at room temperature.
        assert_relative_eq!(saturation_vapour_pressure(0.0), 611.2, epsilon = 0.1);
        let room = saturation_vapour_pressure(20.0);
        assert!((2200.0..2500.0).contains(&room), "esat(20C) = {room}");
    }
}
