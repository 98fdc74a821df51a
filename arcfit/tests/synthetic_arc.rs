//! End-to-end calibration tests against a synthetic xenon arc with a known
//! dispersion polynomial.

use arcfit::{
    ArcLineCalibrator, ArcLineCatalog, CalibrationError, CalibratorConfig, CalibratorState,
};

const N_PIXELS: usize = 1024;

/// True dispersion: gently quadratic, 4000 A at pixel zero.
const DISPERSION: [f64; 3] = [4000.0, 4.0, 5.0e-5];

fn truth_wavelength(pixel: f64) -> f64 {
    DISPERSION[0] + DISPERSION[1] * pixel + DISPERSION[2] * pixel * pixel
}

/// Invert the quadratic to place a catalog line on the detector.
fn pixel_of(wavelength: f64) -> f64 {
    let (a, b, c) = (DISPERSION[0], DISPERSION[1], DISPERSION[2]);
    (-b + (b * b - 4.0 * c * (a - wavelength)).sqrt()) / (2.0 * c)
}

/// Render the xenon catalog through the true dispersion onto a 1-D arc.
fn synthetic_arc() -> Vec<f64> {
    let mut spectrum = vec![5.0; N_PIXELS];
    let sigma: f64 = 1.8;
    for (i, wavelength) in ArcLineCatalog::xenon().wavelengths().iter().enumerate() {
        let center = pixel_of(*wavelength);
        let amplitude = 30.0 + ((i * 37) % 70) as f64;
        for (p, v) in spectrum.iter_mut().enumerate() {
            let z = (p as f64 - center) / sigma;
            *v += amplitude * (-0.5 * z * z).exp();
        }
    }
    spectrum
}

fn test_config() -> CalibratorConfig {
    let mut config = CalibratorConfig::default();
    config.ransac.max_tries = 6000;
    config
}

#[test]
fn test_recovers_known_dispersion() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut cal = ArcLineCalibrator::new(ArcLineCatalog::xenon().clone(), test_config());
    let solution = cal.calibrate(&synthetic_arc(), Some(20240817)).unwrap().clone();

    assert_eq!(*cal.state(), CalibratorState::Fitted);
    assert!(
        cal.peaks().len() >= 32,
        "expected nearly all 34 xenon lines detected, got {}",
        cal.peaks().len()
    );
    assert!(!cal.estimates().is_empty(), "hough produced no estimates");
    assert_eq!(solution.n_candidates, cal.candidates().len());

    assert!(
        solution.inlier_fraction > 0.8,
        "inlier fraction {} too low",
        solution.inlier_fraction
    );
    assert!(solution.rms < 1.0, "rms {} A too high", solution.rms);

    for pixel in [0.0, 128.0, 512.0, 900.0, 1023.0] {
        let err = (solution.wavelength_at(pixel) - truth_wavelength(pixel)).abs();
        assert!(
            err < 1.0,
            "solution off by {err:.3} A at pixel {pixel}"
        );
    }

    let grid = solution.wavelengths(N_PIXELS);
    assert_eq!(grid.len(), N_PIXELS);
    assert!(
        grid.windows(2).all(|w| w[1] > w[0]),
        "solution should be monotonic over the detector"
    );
}

#[test]
fn test_same_seed_gives_identical_solution() {
    let arc = synthetic_arc();
    let catalog = ArcLineCatalog::xenon().clone();

    let mut first = ArcLineCalibrator::new(catalog.clone(), test_config());
    let mut second = ArcLineCalibrator::new(catalog, test_config());
    let a = first.calibrate(&arc, Some(99)).unwrap().clone();
    let b = second.calibrate(&arc, Some(99)).unwrap().clone();

    assert_eq!(a.coefficients, b.coefficients);
    assert_eq!(a.rms, b.rms);
    assert_eq!(a.inlier_count, b.inlier_count);
}

#[test]
fn test_impossible_tolerance_parks_machine_in_failed() {
    let mut config = test_config();
    config.ransac.tolerance = 1e-3;

    let mut cal = ArcLineCalibrator::new(ArcLineCatalog::xenon().clone(), config);
    let err = cal.calibrate(&synthetic_arc(), Some(5)).unwrap_err();
    assert!(
        matches!(err, CalibrationError::NotConverged { .. }),
        "expected NotConverged, got {err:?}"
    );
    assert!(matches!(cal.state(), CalibratorState::Failed { .. }));
    assert!(cal.solution().is_none());

    // The machine stays usable: reset and calibrate with a sane tolerance.
    let mut cal = ArcLineCalibrator::new(ArcLineCatalog::xenon().clone(), test_config());
    assert!(cal.calibrate(&synthetic_arc(), Some(5)).is_ok());
}

#[test]
fn test_stage_products_follow_the_state() {
    let arc = synthetic_arc();
    let mut cal = ArcLineCalibrator::new(ArcLineCatalog::xenon().clone(), test_config());

    let n_peaks = cal.detect_lines(&arc).unwrap();
    assert_eq!(*cal.state(), CalibratorState::LinesDetected { n_peaks });
    assert!(cal.candidates().is_empty());

    let n_candidates = cal.match_candidates().unwrap();
    assert_eq!(
        *cal.state(),
        CalibratorState::CandidatesMatched { n_candidates }
    );
    assert!(cal.solution().is_none());

    cal.fit(Some(7)).unwrap();
    assert_eq!(*cal.state(), CalibratorState::Fitted);
    assert!(cal.solution().is_some());
}
