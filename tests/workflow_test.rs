//! Integration tests for the preprocessing and fitting workflow: correct a
//! synthetic EELS / CL cube, decompose it, and fit a peak model per pixel.

use specdecomp::{
    decompose_cube, fit, fit_cube, Algorithm, BackgroundModel, ComponentSpec, DecompError,
    FitConfig, HyperspectralCube, ModelSpec, SignalAxis, SignalKind,
};

fn gaussian(x: f64, area: f64, centre: f64, sigma: f64) -> f64 {
    let z = (x - centre) / sigma;
    area / (sigma * (2.0 * std::f64::consts::PI).sqrt()) * (-0.5 * z * z).exp()
}

/// 4 × 5 EELS map over 200–598 eV: a power-law background plus a Gaussian
/// edge-like peak at 450 eV whose area grows along the first scan axis.
fn eels_cube() -> HyperspectralCube {
    let axis = SignalAxis::uniform("Energy loss", "eV", 200.0, 2.0, 200).unwrap();
    HyperspectralCube::from_fn(vec![4, 5], axis.clone(), SignalKind::Eels, |idx, ch| {
        let e = axis.values()[ch];
        let a = 1e9 * (1.0 + 0.1 * idx[1] as f64);
        let area = 400.0 + 50.0 * idx[0] as f64;
        a * e.powf(-3.0) + gaussian(e, area, 450.0, 8.0)
    })
}

#[test]
fn test_eels_background_removal_and_peak_fit() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let cube = eels_cube();
    let corrected = cube
        .remove_background((220.0, 380.0), BackgroundModel::PowerLaw)
        .unwrap();

    // Pure power law in the window: nothing left after subtraction
    let window = corrected.axis().index_range(220.0, 380.0).unwrap();
    for spectrum in corrected.spectra() {
        for &v in &spectrum[window.0..=window.1] {
            assert!(v.abs() < 1e-6, "residual background {}", v);
        }
    }

    let peak = corrected.crop_signal(400.0, 500.0).unwrap();
    assert_eq!(peak.signal_len(), 51);
    assert_eq!(peak.axis().values()[0], 400.0);

    let spec = ModelSpec::new()
        .with(ComponentSpec::gaussian(300.0, 445.0, 5.0).bounded("sigma", 1.0, 30.0))
        .with(ComponentSpec::offset(0.0));
    let fits = fit_cube(&spec, &peak, &FitConfig::default()).unwrap();
    assert_eq!(fits.n_not_converged(), 0);

    let areas = fits.parameter_map(0, "A").unwrap();
    assert_eq!(areas.shape(), &[4, 5]);
    for i in 0..4 {
        for j in 0..5 {
            let expected = 400.0 + 50.0 * i as f64;
            let got = areas.get(&[i, j]).unwrap();
            assert!(
                (got - expected).abs() < 1e-3 * expected,
                "pixel ({}, {}): area {} expected {}",
                i,
                j,
                got,
                expected
            );
        }
    }
    let centres = fits.parameter_map(0, "centre").unwrap();
    assert!(centres.data().iter().all(|c| (c - 450.0).abs() < 1e-3));
    assert!(fits.parameter_map(0, "gamma").is_err());
}

#[test]
fn test_corrected_cube_decomposes() {
    let cube = eels_cube()
        .remove_background((220.0, 380.0), BackgroundModel::PowerLaw)
        .unwrap()
        .crop_signal(400.0, 500.0)
        .unwrap()
        .shift_to_non_negative();
    assert!(cube.min_value().unwrap() >= 0.0);

    // A single peak shape with varying area: one dominant component
    let result = decompose_cube(&cube, Algorithm::Svd, 3).unwrap();
    assert!(result.poisson_normalized);
    let ratios = result.explained_variance_ratios().unwrap();
    assert!(ratios[0] > 0.99, "first ratio {}", ratios[0]);

    let nmf = decompose_cube(&cube, Algorithm::Nmf, 1).unwrap();
    assert!(nmf.loadings.iter().all(|&v| v >= 0.0));
    let map = nmf.loading_map(0).unwrap();
    // Loadings follow the peak area, which increases down the first axis
    assert!(map.get(&[3, 0]).unwrap() > map.get(&[0, 0]).unwrap());
}

#[test]
fn test_rebin_preserves_counts() {
    let cube = eels_cube();
    let binned = cube.rebin(&[2, 1], 2).unwrap();
    assert_eq!(binned.nav_shape(), &[2, 5]);
    assert_eq!(binned.signal_len(), 100);
    assert_eq!(binned.axis().values()[0], 201.0);

    let total: f64 = cube.data().iter().sum();
    let binned_total: f64 = binned.data().iter().sum();
    assert!((total - binned_total).abs() < 1e-9 * total);

    assert!(matches!(
        cube.rebin(&[3, 1], 1).unwrap_err(),
        DecompError::Shape(_)
    ));
}

#[test]
fn test_cl_wavelength_to_energy() {
    let axis = SignalAxis::uniform("Wavelength", "nm", 400.0, 2.0, 200).unwrap();
    let cube = HyperspectralCube::from_fn(
        vec![2, 2],
        axis.clone(),
        SignalKind::Cathodoluminescence,
        |_, ch| gaussian(axis.values()[ch], 1000.0, 600.0, 20.0),
    );

    let converted = cube.to_energy_axis().unwrap();
    let energy = converted.axis().values();
    assert_eq!(converted.axis().units, "eV");
    assert!(energy.windows(2).all(|w| w[1] > w[0]));
    assert!((energy[0] - 1239.84198 / 798.0).abs() < 1e-9);

    // Integrated intensity is preserved by the Jacobian
    let spectrum = converted.spectrum(&[1, 1]).unwrap();
    let integral: f64 = energy
        .windows(2)
        .zip(spectrum.windows(2))
        .map(|(e, s)| 0.5 * (s[0] + s[1]) * (e[1] - e[0]))
        .sum();
    assert!((integral - 1000.0).abs() < 10.0, "integral {}", integral);

    // Only CL signals have a wavelength axis to convert
    let eels = eels_cube();
    assert!(matches!(
        eels.to_energy_axis().unwrap_err(),
        DecompError::Domain(_)
    ));
}

#[test]
fn test_crop_outside_axis_is_rejected() {
    let cube = eels_cube();
    assert!(matches!(
        cube.crop_signal(1000.0, 2000.0).unwrap_err(),
        DecompError::Shape(_)
    ));
}

#[test]
fn test_one_spec_many_spectra() {
    // The same specification fits different spectra without carrying state
    let x: Vec<f64> = (0..80).map(|i| i as f64 * 0.25).collect();
    let spec = ModelSpec::new().with(ComponentSpec::lorentzian(5.0, 10.0, 1.0));
    let config = FitConfig::default();

    for (area, centre) in [(8.0, 9.5), (3.0, 11.0)] {
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| {
                let d = xi - centre;
                area / std::f64::consts::PI * 0.8 / (d * d + 0.64)
            })
            .collect();
        let result = fit(&spec, &x, &y, &config).unwrap();
        assert!(result.converged);
        assert!((result.param(0, "A").unwrap() - area).abs() < 1e-4 * area);
        assert!((result.param(0, "centre").unwrap() - centre).abs() < 1e-5);
        assert!((result.param(0, "gamma").unwrap() - 0.8).abs() < 1e-5);
    }
    assert_eq!(spec.initial_params(), vec![5.0, 10.0, 1.0]);
}
